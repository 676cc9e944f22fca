//! JSON envelope of the client event protocol.
//!
//! Requests look like `{event, uuid, parameter: {…}}`. Replies mirror the
//! request's event name and uuid and carry either a `response` or an
//! `error` object. Broadcasts share the reply shape but have no
//! correlating uuid.

use serde_json::{json, Map, Value};

pub const AUTHORIZE: &str = "authorize";
pub const AUTHORISE: &str = "authorise";
pub const GET: &str = "get";
pub const USER_ROLES: &str = "user_roles";
pub const ROLE_LOOPS: &str = "role_loops";
pub const SWITCH_LOOP_STATE: &str = "switch_loop_state";
pub const SWITCH_LOOP_VOLUME: &str = "switch_loop_volume";
pub const TALKING: &str = "talking";
pub const MEDIA: &str = "media";
pub const CANDIDATE: &str = "candidate";
pub const END_OF_CANDIDATES: &str = "end_of_candidates";
pub const CALL: &str = "call";
pub const HANGUP: &str = "hangup";
pub const PERMIT_CALL: &str = "permit_call";
pub const REVOKE_CALL: &str = "revoke_call";
pub const LIST_CALLS: &str = "list_calls";
pub const LIST_CALL_PERMISSIONS: &str = "list_call_permissions";
pub const LIST_SIP_STATUS: &str = "list_sip_status";
pub const SIP: &str = "sip";
pub const SET_KEYSET_LAYOUT: &str = "set_keyset_layout";
pub const GET_KEYSET_LAYOUT: &str = "get_keyset_layout";
pub const SET_USER_DATA: &str = "set_user_data";
pub const GET_USER_DATA: &str = "get_user_data";
pub const GET_RECORDING: &str = "get_recording";
pub const REGISTER: &str = "register";

// Numeric error codes and descriptions are part of the wire contract.
pub const ERROR_CODE_AUTH: u64 = 1001;
pub const ERROR_DESC_AUTH: &str = "authentication failed";
pub const ERROR_CODE_AUTH_PERMISSION: u64 = 1002;
pub const ERROR_DESC_AUTH_PERMISSION: &str = "permission denied";
pub const ERROR_CODE_PARAMETER: u64 = 1003;
pub const ERROR_DESC_PARAMETER: &str = "parameter error";
pub const ERROR_CODE_SESSION_UNKNOWN: u64 = 1004;
pub const ERROR_DESC_SESSION_UNKNOWN: &str = "session unknown";
pub const ERROR_CODE_PROCESSING: u64 = 1005;
pub const ERROR_DESC_PROCESSING: &str = "processing error";
pub const ERROR_CODE_TIMEOUT: u64 = 1006;
pub const ERROR_DESC_TIMEOUT: &str = "timeout";
pub const ERROR_CODE_NOT_IMPLEMENTED: u64 = 1007;
pub const ERROR_DESC_NOT_IMPLEMENTED: &str = "not implemented";

pub fn name(message: &Value) -> Option<&str> {
    message.get("event").and_then(Value::as_str)
}

pub fn uuid(message: &Value) -> Option<&str> {
    message.get("uuid").and_then(Value::as_str)
}

pub fn parameter(message: &Value) -> Option<&Value> {
    message.get("parameter").filter(|value| value.is_object())
}

/// Top-level client id some requests carry alongside the parameter.
pub fn client(message: &Value) -> Option<&str> {
    message.get("client").and_then(Value::as_str)
}

/// String entry of the request parameter object.
pub fn string_parameter<'a>(message: &'a Value, key: &str) -> Option<&'a str> {
    parameter(message)?.get(key).and_then(Value::as_str)
}

/// Numeric entry of the request parameter object.
pub fn u64_parameter(message: &Value, key: &str) -> Option<u64> {
    parameter(message)?.get(key).and_then(Value::as_u64)
}

/// Boolean entry of the request parameter object.
pub fn bool_parameter(message: &Value, key: &str) -> Option<bool> {
    parameter(message)?.get(key).and_then(Value::as_bool)
}

fn reply_head(request: &Value) -> Map<String, Value> {
    let mut head = Map::new();
    if let Some(event) = name(request) {
        head.insert("event".into(), Value::String(event.into()));
    }
    if let Some(uuid) = uuid(request) {
        head.insert("uuid".into(), Value::String(uuid.into()));
    }
    head
}

pub fn success_response(request: &Value) -> Value {
    success_response_with(request, json!({}))
}

pub fn success_response_with(request: &Value, payload: Value) -> Value {
    let mut head = reply_head(request);
    head.insert("response".into(), payload);
    Value::Object(head)
}

pub fn error_response(request: &Value, code: u64, description: &str) -> Value {
    let mut head = reply_head(request);
    head.insert(
        "error".into(),
        json!({ "code": code, "description": description }),
    );
    Value::Object(head)
}

/// Reply carrying a collaborator-provided error object under the
/// original request envelope.
pub fn response_with_error(request: &Value, error: Value) -> Value {
    let mut head = reply_head(request);
    head.insert("error".into(), error);
    Value::Object(head)
}

/// Broadcast frame: reply shaped, no correlating uuid.
pub fn broadcast(event: &str, parameter: Value) -> Value {
    json!({ "event": event, "parameter": parameter })
}
