use serde_json::{json, Value};

use crate::error::AgentError;

pub fn ping() -> Result<Value, AgentError> {
    Ok(json!({ "message": "pong" }))
}

pub fn get_version() -> Result<Value, AgentError> {
    Ok(json!({
        "name": "sk-manager-agent",
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": 1,
    }))
}
