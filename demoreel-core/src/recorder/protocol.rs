//! Minimal framing for the recorder's remote-control protocol
//! (obs-websocket v5): Hello/Identify handshake, request envelopes, and the
//! challenge-response authentication derivation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const RPC_VERSION: u8 = 1;

pub mod opcode {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

pub fn parse_envelope(raw: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(raw)
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelloAuthentication {
    pub challenge: String,
    pub salt: String,
}

pub fn hello_authentication(hello: &Value) -> Option<HelloAuthentication> {
    let authentication = hello.get("authentication")?;
    serde_json::from_value(authentication.clone()).ok()
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`, per the
/// protocol's authentication scheme.
pub fn authentication_token(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}")));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}")))
}

pub fn identify_message(authentication: Option<&str>) -> String {
    let mut d = json!({ "rpcVersion": RPC_VERSION });
    if let Some(token) = authentication {
        d["authentication"] = Value::String(token.to_string());
    }
    json!({ "op": opcode::IDENTIFY, "d": d }).to_string()
}

pub fn request_message(request_type: &str, request_id: &str) -> String {
    json!({
        "op": opcode::REQUEST,
        "d": {
            "requestType": request_type,
            "requestId": request_id,
        }
    })
    .to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub result: bool,
    pub code: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Value,
}

pub fn parse_request_response(d: Value) -> Result<RequestResponse, serde_json::Error> {
    serde_json::from_value(d)
}
