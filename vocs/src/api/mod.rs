
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::async_table::{AsyncEntry, AsyncRequests};
use crate::broadcast::{self, BroadcastRegistry, Namespace};
use crate::error::{Error, Result};
use crate::event;
use crate::loops::Loop;
use crate::permission::Permission;
use crate::session::ClientSession;
use crate::Socket;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

pub const SYSTEM_TOPIC: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Request,
    Offer,
    Answer,
}

impl MediaType {
    pub fn from_name(name: &str) -> Option<MediaType> {
        match name {
            "request" => Some(MediaType::Request),
            "offer" => Some(MediaType::Offer),
            "answer" => Some(MediaType::Answer),
            _ => None,
        }
    }
}

/// ICE candidate as carried by `candidate` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateInfo {
    pub candidate: String,
    pub ufrag: String,
    pub sdp_mline_index: Option<u64>,
    pub sdp_mid: Option<String>,
}

impl CandidateInfo {
    pub fn from_json(parameter: &Value) -> Option<CandidateInfo> {
        Some(CandidateInfo {
            candidate: parameter.get("candidate")?.as_str()?.to_string(),
            ufrag: parameter.get("ufrag")?.as_str()?.to_string(),
            sdp_mline_index: parameter.get("SDPMlineIndex").and_then(Value::as_u64),
            sdp_mid: parameter
                .get("SDPMid")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// SIP call permission as carried by `permit_call`/`revoke_call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipPermission {
    pub caller: String,
    pub callee: String,
    pub loop_name: String,
    pub valid_from: Option<u64>,
    pub valid_until: Option<u64>,
}

impl SipPermission {
    pub fn from_json(parameter: &Value) -> Option<SipPermission> {
        Some(SipPermission {
            caller: parameter.get("caller")?.as_str()?.to_string(),
            callee: parameter.get("callee")?.as_str()?.to_string(),
            loop_name: parameter.get("loop")?.as_str()?.to_string(),
            valid_from: parameter.get("valid_from").and_then(Value::as_u64),
            valid_until: parameter.get("valid_until").and_then(Value::as_u64),
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordingQuery {
    pub loop_name: Option<String>,
    pub user: Option<String>,
    pub from_epoch_secs: Option<u64>,
    pub until_epoch_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingsReply {
    Results(Value),
    TooManyResults,
    Failed,
}

/// User, role, loop and layout queries against the vocs database.
#[async_trait]
pub trait Database {
    async fn authorize(&self, user: &str, role: &str) -> bool;
    async fn authorize_domain_admin(&self, user: &str, domain: &str) -> bool;
    async fn entity(&self, user: &str) -> Option<Value>;
    async fn entity_domain(&self, user: &str) -> Option<Value>;
    async fn user_roles(&self, user: &str) -> Option<Value>;
    /// Loops the role may attend, as an object `{loop: permission}`.
    async fn role_loops(&self, user: &str, role: &str) -> Option<Value>;
    async fn permission(&self, role: &str, loop_name: &str) -> Permission;
    async fn sip_allow_callout(&self, loop_name: &str, role: &str) -> bool;
    async fn sip_allow_callend(&self, loop_name: Option<&str>, role: &str) -> bool;
    async fn set_keyset_layout(&self, domain: &str, name: &str, layout: &Value) -> bool;
    async fn keyset_layout(&self, domain: &str, layout: &str) -> Option<Value>;
    async fn set_user_data(&self, user: &str, data: &Value) -> bool;
    async fn user_data(&self, user: &str) -> Option<Value>;
}

/// Media, ICE, SIP and recording operations of the vocs core.
///
/// Operations returning plain `bool` acknowledge acceptance; their
/// results arrive later as correlated replies through
/// [`ApiClient::handle_core_reply`].
#[async_trait]
pub trait MediaCore {
    async fn session_create(&self, uuid: &str) -> bool;
    async fn session_update(&self, uuid: &str, session: &str, kind: MediaType, sdp: &str) -> bool;
    async fn candidate(&self, uuid: &str, session: &str, info: &CandidateInfo) -> bool;
    async fn end_of_candidates(&self, uuid: &str, session: &str) -> bool;
    #[allow(clippy::too_many_arguments)]
    async fn switch_loop(
        &self,
        uuid: &str,
        session: &str,
        user: &str,
        role: &str,
        loop_name: &str,
        current: Permission,
        requested: Permission,
    ) -> bool;
    async fn set_loop_volume(
        &self,
        uuid: &str,
        session: &str,
        loop_name: &str,
        percent: u8,
    ) -> bool;
    async fn ptt(&self, user: &str, role: &str, loop_name: &str, off: bool);
    async fn sip_status(&self) -> bool;
    /// Issues a SIP call; the returned uuid correlates the gateway reply.
    async fn sip_create_call(
        &self,
        loop_name: &str,
        destination: &str,
        from: Option<&str>,
    ) -> Option<String>;
    async fn sip_terminate_call(&self, call_id: &str) -> bool;
    async fn sip_create_permission(&self, permission: &SipPermission) -> bool;
    async fn sip_terminate_permission(&self, permission: &SipPermission) -> bool;
    async fn sip_list_calls(&self, uuid: &str) -> bool;
    async fn sip_list_call_permissions(&self, uuid: &str) -> bool;
    async fn sip_list_sip_status(&self, uuid: &str) -> bool;
    async fn recordings(&self, query: RecordingQuery) -> RecordingsReply;
}

/// Outbound edge towards connected clients.
#[async_trait]
pub trait ClientSink {
    async fn send(&self, socket: Socket, message: &Value) -> Result<()>;
    async fn drop_connection(&self, socket: Socket);
}

#[derive(Debug, Clone, Copy)]
pub struct ApiClientConfig {
    /// How long a collaborator may take to answer a correlated request.
    pub response_timeout: Duration,
    pub async_capacity: usize,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            async_capacity: crate::async_table::DEFAULT_CAPACITY,
        }
    }
}

/// Event dispatcher for authenticated voice clients.
///
/// Consumes parsed JSON events per socket, drives authorization, loop
/// membership and push-to-talk state, forwards media/ICE/SIP work to the
/// collaborators and fans out broadcasts. `Err` from an entry point means
/// the transport must drop the socket; protocol faults travel back as
/// error responses and leave the connection alone.
pub struct ApiClient {
    config: ApiClientConfig,

    db: Arc<dyn Database + Send + Sync>,
    core: Arc<dyn MediaCore + Send + Sync>,
    sink: Arc<dyn ClientSink + Send + Sync>,

    sessions: Mutex<HashMap<Socket, ClientSession>>,
    loops: Mutex<HashMap<String, Loop>>,
    broadcasts: Mutex<BroadcastRegistry>,
    async_requests: AsyncRequests,
}

impl ApiClient {
    pub fn new(
        config: ApiClientConfig,
        db: Arc<dyn Database + Send + Sync>,
        core: Arc<dyn MediaCore + Send + Sync>,
        sink: Arc<dyn ClientSink + Send + Sync>,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            async_requests: AsyncRequests::with_capacity(
                config.response_timeout,
                config.async_capacity,
            ),
            config,
            db,
            core,
            sink,
            sessions: Mutex::new(HashMap::new()),
            loops: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(BroadcastRegistry::new()),
        });

        let weak = Arc::downgrade(&client);
        client.async_requests.on_timeout(Box::new(move |entry| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(client) = weak.upgrade() {
                    client.handle_async_timeout(entry).await;
                }
            })
        }));

        client
    }

    pub fn config(&self) -> ApiClientConfig {
        self.config
    }

    /// Registers a fresh, unauthenticated session for a socket.
    pub fn connect(&self, socket: Socket) {
        self.sessions.lock().insert(socket, ClientSession::default());
    }

    /// Attaches the logged-in user to the socket's session and joins the
    /// user's broadcast topic.
    pub fn authenticate(&self, socket: Socket, user: &str) {
        self.sessions
            .lock()
            .entry(socket)
            .or_default()
            .user = Some(user.to_string());
        self.broadcasts.lock().set(Namespace::User, user, socket);
    }

    /// Marks the media session negotiated by the media core.
    pub fn set_session_id(&self, socket: Socket, session_id: &str) {
        self.update_session(socket, |session| {
            session.session_id = Some(session_id.to_string());
        });
    }

    pub fn set_media_ready(&self, socket: Socket, ready: bool) {
        self.update_session(socket, |session| session.media_ready = ready);
    }

    pub fn set_ice_ready(&self, socket: Socket, ready: bool) {
        self.update_session(socket, |session| session.ice_ready = ready);
    }

    /// Tears the socket down: session, loop memberships and broadcast
    /// subscriptions go away. Pending async requests age out on their
    /// own.
    pub fn disconnect(&self, socket: Socket) {
        self.sessions.lock().remove(&socket);
        for participants in self.loops.lock().values_mut() {
            participants.drop_participant(socket);
        }
        self.broadcasts.lock().drop_socket(socket);
        log::info!("client at socket {socket} disconnected");
    }

    pub fn session(&self, socket: Socket) -> Option<ClientSession> {
        self.sessions.lock().get(&socket).cloned()
    }

    /// Participant snapshot of a loop, if the loop is known.
    pub fn loop_participants(&self, loop_name: &str) -> Option<Value> {
        self.loops
            .lock()
            .get(loop_name)
            .map(|entry| entry.participants())
    }

    pub fn pending_requests(&self) -> usize {
        self.async_requests.len()
    }

    /// Fans a frame out to every socket registered on the system topic.
    pub async fn broadcast_system(&self, frame: &Value) -> usize {
        let sockets = {
            self.broadcasts
                .lock()
                .sockets(Namespace::System, SYSTEM_TOPIC)
        };
        broadcast::send(&sockets, frame, &self.sink).await
    }

    fn update_session<T>(
        &self,
        socket: Socket,
        update: impl FnOnce(&mut ClientSession) -> T,
    ) -> Option<T> {
        self.sessions.lock().get_mut(&socket).map(update)
    }

    async fn send(&self, socket: Socket, message: &Value) -> Result<()> {
        self.sink.send(socket, message).await.map_err(|err| {
            log::error!("failed to send to socket {socket}: {err}");
            Error::ErrSendFailed(socket)
        })
    }

    async fn send_success(&self, socket: Socket, request: &Value, payload: Value) -> Result<()> {
        self.send(socket, &event::success_response_with(request, payload))
            .await
    }

    async fn send_error(
        &self,
        socket: Socket,
        request: &Value,
        code: u64,
        description: &str,
    ) -> Result<()> {
        self.send(socket, &event::error_response(request, code, description))
            .await
    }

    fn register_async(&self, uuid: &str, socket: Socket, request: Value) -> Result<()> {
        if self
            .async_requests
            .insert(uuid, AsyncEntry { socket, request })
        {
            Ok(())
        } else {
            log::error!("failed to register async request {uuid} - closing {socket}");
            Err(Error::ErrAsyncRegister(uuid.to_string()))
        }
    }

    async fn loop_broadcast(&self, loop_name: &str, frame: &Value) {
        let sockets = { self.broadcasts.lock().sockets(Namespace::Loop, loop_name) };
        broadcast::send(&sockets, frame, &self.sink).await;
    }

    async fn user_broadcast(&self, user: &str, frame: &Value) {
        let sockets = { self.broadcasts.lock().sockets(Namespace::User, user) };
        broadcast::send(&sockets, frame, &self.sink).await;
    }

    async fn handle_async_timeout(&self, entry: AsyncEntry) {
        log::error!(
            "async timeout - dropping {} | {}",
            entry.socket,
            entry.request
        );

        let response = event::error_response(
            &entry.request,
            event::ERROR_CODE_TIMEOUT,
            event::ERROR_DESC_TIMEOUT,
        );
        if let Err(err) = self.sink.send(entry.socket, &response).await {
            log::warn!("timeout response to {} undeliverable: {err}", entry.socket);
        }
        self.sink.drop_connection(entry.socket).await;
    }

    /// Dispatches one client event.
    pub async fn handle_event(&self, socket: Socket, input: Value) -> Result<()> {
        let name = match event::name(&input) {
            Some(name) => name.to_string(),
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Ok(());
            }
        };

        match name.as_str() {
            event::AUTHORIZE | event::AUTHORISE => self.on_authorize(socket, input).await,
            event::GET => self.on_get(socket, input).await,
            event::USER_ROLES => self.on_user_roles(socket, input).await,
            event::ROLE_LOOPS => self.on_role_loops(socket, input).await,
            event::SWITCH_LOOP_STATE => self.on_switch_loop_state(socket, input).await,
            event::SWITCH_LOOP_VOLUME => self.on_switch_loop_volume(socket, input).await,
            event::TALKING => self.on_talking(socket, input).await,
            event::MEDIA => self.on_media(socket, input).await,
            event::CANDIDATE => self.on_candidate(socket, input).await,
            event::END_OF_CANDIDATES => self.on_end_of_candidates(socket, input).await,
            event::CALL => self.on_call(socket, input).await,
            event::HANGUP => self.on_hangup(socket, input).await,
            event::PERMIT_CALL => self.on_permit_call(socket, input).await,
            event::REVOKE_CALL => self.on_revoke_call(socket, input).await,
            event::LIST_CALLS => self.on_list(socket, input, ListKind::Calls).await,
            event::LIST_CALL_PERMISSIONS => {
                self.on_list(socket, input, ListKind::CallPermissions).await
            }
            event::LIST_SIP_STATUS => self.on_list(socket, input, ListKind::SipStatus).await,
            event::SIP => self.on_sip_status(socket, input).await,
            event::SET_KEYSET_LAYOUT => self.on_set_keyset_layout(socket, input).await,
            event::GET_KEYSET_LAYOUT => self.on_get_keyset_layout(socket, input).await,
            event::SET_USER_DATA => self.on_set_user_data(socket, input).await,
            event::GET_USER_DATA => self.on_get_user_data(socket, input).await,
            event::GET_RECORDING => self.on_get_recording(socket, input).await,
            event::REGISTER => self.on_register(socket, input).await,
            other => {
                // unknown events answer with a parameter error, they do
                // not end the connection
                log::debug!("unknown event {other} from socket {socket}");
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Completes a pending request with a collaborator reply carrying the
    /// original uuid. Replies without a pending entry are dropped.
    pub async fn handle_core_reply(&self, reply: Value) -> Result<()> {
        let uuid = match event::uuid(&reply) {
            Some(uuid) => uuid.to_string(),
            None => return Err(Error::ErrParameter),
        };

        let entry = match self.async_requests.resolve(&uuid) {
            Some(entry) => entry,
            None => {
                log::debug!("no pending request for uuid {uuid}");
                return Ok(());
            }
        };
        let AsyncEntry { socket, request } = entry;

        if let Some(error) = reply.get("error") {
            return self
                .send(socket, &event::response_with_error(&request, error.clone()))
                .await;
        }

        if event::name(&request) == Some(event::SWITCH_LOOP_STATE) {
            self.complete_switch_loop(socket, &request).await;
        }

        let payload = reply.get("response").cloned().unwrap_or_else(|| json!({}));
        self.send_success(socket, &request, payload).await
    }

    async fn complete_switch_loop(&self, socket: Socket, request: &Value) {
        let loop_name = match event::string_parameter(request, "loop") {
            Some(name) => name.to_string(),
            None => return,
        };
        let requested =
            Permission::from_name(event::string_parameter(request, "state").unwrap_or("none"));
        let client_id = event::client(request).map(str::to_string);

        let (user, role) = match self.session(socket) {
            Some(ClientSession {
                user: Some(user),
                role: Some(role),
                ..
            }) => (user, role),
            // the client vanished while the core was working
            _ => return,
        };

        self.update_session(socket, |session| {
            if requested == Permission::None {
                session.loops.remove(&loop_name);
            } else {
                session.loops.insert(loop_name.clone(), requested);
            }
        });

        {
            let mut loops = self.loops.lock();
            let entry = loops
                .entry(loop_name.clone())
                .or_insert_with(|| Loop::new(&loop_name));
            if requested == Permission::None {
                entry.drop_participant(socket);
            } else {
                entry.add_participant(socket, client_id.as_deref(), &user, &role);
            }
        }

        let frame = event::broadcast(
            event::SWITCH_LOOP_STATE,
            json!({
                "loop": loop_name,
                "user": user,
                "role": role,
                "state": requested.as_str(),
            }),
        );
        self.loop_broadcast(&loop_name, &frame).await;
    }

    async fn on_authorize(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let user = session.user.clone().ok_or(Error::ErrUnauthenticated)?;

        if session.role.is_some() {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_NOT_IMPLEMENTED,
                "current status: changing a role MUST be done using logout/login.",
            )
            .await?;
            return Err(Error::Other("role change without logout".into()));
        }

        let role = match event::string_parameter(&input, "role") {
            Some(role) => role.to_string(),
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Err(Error::ErrParameter);
            }
        };

        if !self.db.authorize(&user, &role).await {
            self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                .await?;
            return Err(Error::ErrUnauthenticated);
        }

        self.update_session(socket, |session| session.role = Some(role.clone()));
        self.broadcasts.lock().set(Namespace::Role, &role, socket);

        self.send_success(socket, &input, json!({ "id": role })).await?;
        log::info!("VOCS AUTHORIZE at {socket} | {user} | {role}");
        Ok(())
    }

    async fn on_get(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let user = match session.user {
            Some(user) => user,
            None => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Err(Error::ErrUnauthenticated);
            }
        };

        let entity_type = match event::string_parameter(&input, "type") {
            Some(entity_type) => entity_type.to_string(),
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Err(Error::ErrParameter);
            }
        };

        if entity_type != "user" {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_NOT_IMPLEMENTED,
                "only GET user implemented yet.",
            )
            .await?;
            return Err(Error::Other(format!("GET type {entity_type}")));
        }

        let entity = self.db.entity(&user).await.unwrap_or(Value::Null);
        let mut payload = json!({ "result": entity, "type": "user" });
        if let Some(domain) = self.db.entity_domain(&user).await {
            payload["domain"] = domain;
        }

        self.send_success(socket, &input, payload).await
    }

    async fn on_user_roles(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let user = session.user.ok_or(Error::ErrUnauthenticated)?;

        let roles = match self.db.user_roles(&user).await {
            Some(roles) => roles,
            None => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Err(Error::ErrUnauthenticated);
            }
        };

        self.send_success(socket, &input, json!({ "roles": roles })).await
    }

    async fn on_role_loops(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let (user, role) = match (session.user, session.role) {
            (Some(user), Some(role)) => (user, role),
            _ => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Err(Error::ErrUnauthenticated);
            }
        };

        let loops = match self.db.role_loops(&user, &role).await {
            Some(loops) => loops,
            None => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Err(Error::ErrUnauthenticated);
            }
        };

        // every loop the role may attend feeds this socket its broadcasts
        if let Some(entries) = loops.as_object() {
            let mut broadcasts = self.broadcasts.lock();
            for loop_name in entries.keys() {
                broadcasts.set(Namespace::Loop, loop_name, socket);
            }
        }

        self.send_success(socket, &input, json!({ "loops": loops })).await
    }

    async fn on_switch_loop_state(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let (user, role) = match (session.user.clone(), session.role.clone()) {
            (Some(user), Some(role)) => (user, role),
            _ => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Err(Error::ErrUnauthenticated);
            }
        };

        let session_id = match session.session_id.clone() {
            Some(session_id) => session_id,
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_SESSION_UNKNOWN,
                    event::ERROR_DESC_SESSION_UNKNOWN,
                )
                .await?;
                return Err(Error::ErrNoSession);
            }
        };

        let (uuid, loop_name, state) = match (
            event::uuid(&input),
            event::string_parameter(&input, "loop"),
            event::string_parameter(&input, "state"),
        ) {
            (Some(uuid), Some(loop_name), Some(state)) => {
                (uuid.to_string(), loop_name.to_string(), state.to_string())
            }
            _ => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Err(Error::ErrParameter);
            }
        };

        if !(session.ice_ready && session.media_ready) {
            return Err(Error::ErrMediaNotReady);
        }

        let requested = Permission::from_name(&state);
        let held = self.db.permission(&role, &loop_name).await;

        if !held.granted(requested) {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_AUTH_PERMISSION,
                event::ERROR_DESC_AUTH_PERMISSION,
            )
            .await?;
            return Err(Error::ErrUnauthenticated);
        }

        let current = session.loop_state(&loop_name);

        if current == requested {
            // no state change: answer from the loop registry without
            // bothering the media core
            let participants = {
                let mut loops = self.loops.lock();
                loops
                    .entry(loop_name.clone())
                    .or_insert_with(|| Loop::new(&loop_name))
                    .participants()
            };

            let payload = json!({
                "participants": participants,
                "state": current.as_str(),
                "loop": loop_name,
            });
            return self.send_success(socket, &input, payload).await;
        }

        if !self
            .core
            .switch_loop(
                &uuid,
                &session_id,
                &user,
                &role,
                &loop_name,
                current,
                requested,
            )
            .await
        {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_PROCESSING,
                event::ERROR_DESC_PROCESSING,
            )
            .await?;
            return Err(Error::ErrProcessing);
        }

        self.register_async(&uuid, socket, input)
    }

    async fn on_switch_loop_volume(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let user = match (session.user.clone(), session.role.clone()) {
            (Some(user), Some(_)) => user,
            _ => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Err(Error::ErrUnauthenticated);
            }
        };

        let volume = event::u64_parameter(&input, "volume");
        let (uuid, loop_name, volume) = match (
            event::uuid(&input),
            event::string_parameter(&input, "loop"),
            volume,
        ) {
            (Some(uuid), Some(loop_name), Some(volume)) if volume <= 100 => {
                (uuid.to_string(), loop_name.to_string(), volume as u8)
            }
            _ => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Err(Error::ErrParameter);
            }
        };

        let session_id = match session.session_id {
            Some(session_id) => session_id,
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_SESSION_UNKNOWN,
                    event::ERROR_DESC_SESSION_UNKNOWN,
                )
                .await?;
                return Err(Error::ErrNoSession);
            }
        };

        if !self
            .core
            .set_loop_volume(&uuid, &session_id, &loop_name, volume)
            .await
        {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_PROCESSING,
                event::ERROR_DESC_PROCESSING,
            )
            .await?;
            return Err(Error::ErrProcessing);
        }

        self.register_async(&uuid, socket, input)?;

        // tell the user's other clients about the new volume
        let frame = event::broadcast(
            event::SWITCH_LOOP_VOLUME,
            json!({ "loop": loop_name, "volume": volume }),
        );
        self.user_broadcast(&user, &frame).await;

        Ok(())
    }

    async fn on_talking(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let (user, role) = match (session.user, session.role) {
            (Some(user), Some(role)) => (user, role),
            _ => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Ok(());
            }
        };

        let state = event::bool_parameter(&input, "state");
        let (loop_name, state) = match (
            event::uuid(&input),
            event::string_parameter(&input, "loop"),
            state,
        ) {
            (Some(_), Some(loop_name), Some(state)) => (loop_name.to_string(), state),
            _ => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Ok(());
            }
        };

        // talking requires the full send permission on the loop
        if self.db.permission(&role, &loop_name).await != Permission::Send {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_AUTH_PERMISSION,
                event::ERROR_DESC_AUTH_PERMISSION,
            )
            .await?;
            return Ok(());
        }

        self.core.ptt(&user, &role, &loop_name, !state).await;

        let payload = json!({
            "user": user,
            "role": role,
            "loop": loop_name,
            "state": state,
        });
        self.send_success(socket, &input, payload.clone()).await?;

        let mut parameter = payload;
        if let Some(client) = event::client(&input) {
            parameter["client"] = Value::String(client.to_string());
        }
        let frame = event::broadcast(event::TALKING, parameter);
        self.loop_broadcast(&loop_name, &frame).await;

        Ok(())
    }

    async fn on_media(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        if session.user.is_none() {
            return Err(Error::ErrUnauthenticated);
        }

        let uuid = match event::uuid(&input) {
            Some(uuid) => uuid.to_string(),
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Err(Error::ErrParameter);
            }
        };

        let kind = event::string_parameter(&input, "type").and_then(MediaType::from_name);

        match kind {
            Some(MediaType::Request) => {
                if !self.core.session_create(&uuid).await {
                    self.send_error(
                        socket,
                        &input,
                        event::ERROR_CODE_PROCESSING,
                        event::ERROR_DESC_PROCESSING,
                    )
                    .await?;
                    return Err(Error::ErrProcessing);
                }
            }
            Some(kind) => {
                let sdp = match event::string_parameter(&input, "sdp") {
                    Some(sdp) => sdp.to_string(),
                    None => {
                        self.send_error(
                            socket,
                            &input,
                            event::ERROR_CODE_PARAMETER,
                            event::ERROR_DESC_PARAMETER,
                        )
                        .await?;
                        return Err(Error::ErrParameter);
                    }
                };
                let session_id = match session.session_id {
                    Some(session_id) => session_id,
                    None => {
                        self.send_error(
                            socket,
                            &input,
                            event::ERROR_CODE_SESSION_UNKNOWN,
                            event::ERROR_DESC_SESSION_UNKNOWN,
                        )
                        .await?;
                        return Err(Error::ErrNoSession);
                    }
                };

                if !self
                    .core
                    .session_update(&uuid, &session_id, kind, &sdp)
                    .await
                {
                    self.send_error(
                        socket,
                        &input,
                        event::ERROR_CODE_PROCESSING,
                        event::ERROR_DESC_PROCESSING,
                    )
                    .await?;
                    return Err(Error::ErrProcessing);
                }
            }
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Err(Error::ErrParameter);
            }
        }

        self.register_async(&uuid, socket, input)
    }

    async fn on_candidate(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        if session.user.is_none() {
            return Err(Error::ErrUnauthenticated);
        }

        let info = event::parameter(&input).and_then(CandidateInfo::from_json);
        let (uuid, info) = match (event::uuid(&input), info) {
            (Some(uuid), Some(info)) => (uuid.to_string(), info),
            _ => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Err(Error::ErrParameter);
            }
        };

        let session_id = match session.session_id {
            Some(session_id) => session_id,
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_SESSION_UNKNOWN,
                    event::ERROR_DESC_SESSION_UNKNOWN,
                )
                .await?;
                return Err(Error::ErrNoSession);
            }
        };

        if !self.core.candidate(&uuid, &session_id, &info).await {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_PROCESSING,
                event::ERROR_DESC_PROCESSING,
            )
            .await?;
            return Err(Error::ErrProcessing);
        }

        self.register_async(&uuid, socket, input)
    }

    async fn on_end_of_candidates(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        if session.user.is_none() {
            return Err(Error::ErrUnauthenticated);
        }

        let uuid = match event::uuid(&input) {
            Some(uuid) => uuid.to_string(),
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Err(Error::ErrParameter);
            }
        };

        let session_id = match session.session_id {
            Some(session_id) => session_id,
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_SESSION_UNKNOWN,
                    event::ERROR_DESC_SESSION_UNKNOWN,
                )
                .await?;
                return Err(Error::ErrNoSession);
            }
        };

        if !self.core.end_of_candidates(&uuid, &session_id).await {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_PROCESSING,
                event::ERROR_DESC_PROCESSING,
            )
            .await?;
            return Err(Error::ErrProcessing);
        }

        self.register_async(&uuid, socket, input)
    }

    async fn on_call(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let role = match (session.user, session.role) {
            (Some(_), Some(role)) => role,
            _ => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Ok(());
            }
        };

        let (loop_name, destination) = match (
            event::uuid(&input),
            event::string_parameter(&input, "loop"),
            event::string_parameter(&input, "destination"),
        ) {
            (Some(_), Some(loop_name), Some(destination)) => {
                (loop_name.to_string(), destination.to_string())
            }
            _ => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Ok(());
            }
        };
        let from = event::string_parameter(&input, "from").map(str::to_string);

        if !self.db.sip_allow_callout(&loop_name, &role).await {
            self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                .await?;
            return Ok(());
        }

        // the gateway issues the uuid correlating its reply
        let request_uuid = match self
            .core
            .sip_create_call(&loop_name, &destination, from.as_deref())
            .await
        {
            Some(request_uuid) => request_uuid,
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PROCESSING,
                    event::ERROR_DESC_PROCESSING,
                )
                .await?;
                return Ok(());
            }
        };

        if self.register_async(&request_uuid, socket, input).is_err() {
            log::warn!("call request {request_uuid} could not be registered");
        }
        Ok(())
    }

    async fn on_hangup(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let role = match (session.user, session.role) {
            (Some(_), Some(role)) => role,
            _ => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Ok(());
            }
        };

        let call_id = match (event::uuid(&input), event::string_parameter(&input, "call")) {
            (Some(_), Some(call_id)) => call_id.to_string(),
            _ => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Ok(());
            }
        };
        let loop_name = event::string_parameter(&input, "loop").map(str::to_string);

        if !self
            .db
            .sip_allow_callend(loop_name.as_deref(), &role)
            .await
        {
            self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                .await?;
            return Ok(());
        }

        if self.core.sip_terminate_call(&call_id).await {
            self.send_success(socket, &input, json!({})).await?;
        } else {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_PROCESSING,
                event::ERROR_DESC_PROCESSING,
            )
            .await?;
        }
        Ok(())
    }

    async fn on_permit_call(&self, socket: Socket, input: Value) -> Result<()> {
        self.on_call_permission(socket, input, true).await
    }

    async fn on_revoke_call(&self, socket: Socket, input: Value) -> Result<()> {
        self.on_call_permission(socket, input, false).await
    }

    async fn on_call_permission(&self, socket: Socket, input: Value, create: bool) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        if session.user.is_none() || session.role.is_none() {
            self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                .await?;
            return Ok(());
        }

        let permission = event::parameter(&input).and_then(SipPermission::from_json);
        let permission = match (event::uuid(&input), permission) {
            (Some(_), Some(permission)) => permission,
            _ => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Ok(());
            }
        };

        let accepted = if create {
            self.core.sip_create_permission(&permission).await
        } else {
            self.core.sip_terminate_permission(&permission).await
        };

        if accepted {
            self.send_success(socket, &input, json!({})).await?;
        } else {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_PROCESSING,
                event::ERROR_DESC_PROCESSING,
            )
            .await?;
        }
        Ok(())
    }

    async fn on_list(&self, socket: Socket, input: Value, kind: ListKind) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let uuid = match (session.user, session.role, event::uuid(&input)) {
            (Some(_), Some(_), Some(uuid)) => uuid.to_string(),
            _ => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Ok(());
            }
        };

        // register first: the gateway reply may race the return path
        if self.register_async(&uuid, socket, input).is_err() {
            return Ok(());
        }

        let accepted = match kind {
            ListKind::Calls => self.core.sip_list_calls(&uuid).await,
            ListKind::CallPermissions => self.core.sip_list_call_permissions(&uuid).await,
            ListKind::SipStatus => self.core.sip_list_sip_status(&uuid).await,
        };

        if !accepted {
            if let Some(entry) = self.async_requests.resolve(&uuid) {
                self.send_error(
                    entry.socket,
                    &entry.request,
                    event::ERROR_CODE_PROCESSING,
                    event::ERROR_DESC_PROCESSING,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn on_sip_status(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        if session.user.is_none() {
            self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                .await?;
            return Ok(());
        }

        let connected = self.core.sip_status().await;
        self.send_success(socket, &input, json!({ "connected": connected }))
            .await?;
        Ok(())
    }

    async fn on_set_keyset_layout(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let user = session.user.ok_or(Error::ErrUnauthenticated)?;

        let layout = event::parameter(&input).and_then(|parameter| parameter.get("layout"));
        let (domain, name, layout) = match (
            event::string_parameter(&input, "domain"),
            event::string_parameter(&input, "name"),
            layout,
        ) {
            (Some(domain), Some(name), Some(layout)) => {
                (domain.to_string(), name.to_string(), layout.clone())
            }
            _ => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Ok(());
            }
        };

        if !self.db.authorize_domain_admin(&user, &domain).await {
            self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                .await?;
            return Ok(());
        }

        if !self.db.set_keyset_layout(&domain, &name, &layout).await {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_PROCESSING,
                event::ERROR_DESC_PROCESSING,
            )
            .await?;
            return Ok(());
        }

        self.send_success(socket, &input, json!({})).await?;
        Ok(())
    }

    async fn on_get_keyset_layout(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        if session.user.is_none() {
            return Err(Error::ErrUnauthenticated);
        }

        // anyone authenticated may read a keyset layout
        let (domain, layout_name) = match (
            event::string_parameter(&input, "domain"),
            event::string_parameter(&input, "layout"),
        ) {
            (Some(domain), Some(layout_name)) => (domain.to_string(), layout_name.to_string()),
            _ => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Ok(());
            }
        };

        match self.db.keyset_layout(&domain, &layout_name).await {
            Some(layout) => {
                self.send_success(socket, &input, json!({ "layout": layout }))
                    .await?
            }
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PROCESSING,
                    event::ERROR_DESC_PROCESSING,
                )
                .await?
            }
        }
        Ok(())
    }

    async fn on_set_user_data(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let user = match session.user {
            Some(user) => user,
            None => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Ok(());
            }
        };

        let data = match event::parameter(&input) {
            Some(data) => data.clone(),
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PARAMETER,
                    event::ERROR_DESC_PARAMETER,
                )
                .await?;
                return Ok(());
            }
        };

        if !self.db.set_user_data(&user, &data).await {
            self.send_error(
                socket,
                &input,
                event::ERROR_CODE_PROCESSING,
                event::ERROR_DESC_PROCESSING,
            )
            .await?;
            return Ok(());
        }

        self.send_success(socket, &input, json!({ "data": data.clone() }))
            .await?;

        // the user's other clients follow the profile change
        let frame = event::broadcast(event::SET_USER_DATA, json!({ "data": data }));
        self.user_broadcast(&user, &frame).await;

        Ok(())
    }

    async fn on_get_user_data(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        let user = match session.user {
            Some(user) => user,
            None => {
                self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                    .await?;
                return Ok(());
            }
        };

        match self.db.user_data(&user).await {
            Some(data) => {
                self.send_success(socket, &input, json!({ "data": data }))
                    .await?
            }
            None => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PROCESSING,
                    event::ERROR_DESC_PROCESSING,
                )
                .await?
            }
        }
        Ok(())
    }

    async fn on_get_recording(&self, socket: Socket, input: Value) -> Result<()> {
        let session = self.session(socket).ok_or(Error::ErrUnauthenticated)?;
        if session.user.is_none() {
            self.send_error(socket, &input, event::ERROR_CODE_AUTH, event::ERROR_DESC_AUTH)
                .await?;
            return Ok(());
        }

        let query = RecordingQuery {
            loop_name: event::string_parameter(&input, "loop").map(str::to_string),
            user: event::string_parameter(&input, "user").map(str::to_string),
            from_epoch_secs: event::u64_parameter(&input, "from"),
            until_epoch_secs: event::u64_parameter(&input, "to"),
        };

        match self.core.recordings(query).await {
            RecordingsReply::Results(results) => {
                self.send_success(socket, &input, results).await?
            }
            RecordingsReply::TooManyResults => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PROCESSING,
                    "Search returned too many results - please confine your search parameters",
                )
                .await?
            }
            RecordingsReply::Failed => {
                self.send_error(
                    socket,
                    &input,
                    event::ERROR_CODE_PROCESSING,
                    event::ERROR_DESC_PROCESSING,
                )
                .await?
            }
        }
        Ok(())
    }

    async fn on_register(&self, socket: Socket, input: Value) -> Result<()> {
        self.broadcasts
            .lock()
            .set(Namespace::System, SYSTEM_TOPIC, socket);

        self.send_success(socket, &input, json!({})).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ListKind {
    Calls,
    CallPermissions,
    SipStatus,
}
