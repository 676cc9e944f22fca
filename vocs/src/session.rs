use std::collections::HashMap;

use crate::permission::Permission;

/// Dispatcher-side view of one connected client.
///
/// Created unauthenticated on connect; `user` arrives with the login
/// layer, `role` with `authorize`, the media fields while the media/ICE
/// setup completes. `loops` caches the loop state the client holds.
#[derive(Debug, Default, Clone)]
pub struct ClientSession {
    pub user: Option<String>,
    pub role: Option<String>,
    pub session_id: Option<String>,
    pub media_ready: bool,
    pub ice_ready: bool,
    pub loops: HashMap<String, Permission>,
}

impl ClientSession {
    pub fn loop_state(&self, loop_name: &str) -> Permission {
        self.loops.get(loop_name).copied().unwrap_or_default()
    }
}
