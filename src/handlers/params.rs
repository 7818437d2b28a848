//! Small parameter-extraction helpers shared by every handler — every
//! missing or mistyped field becomes `INVALID_PARAMS`, never a panic.

use serde_json::Value;

use crate::error::AgentError;

pub fn str_field<'a>(params: &'a Value, name: &str) -> Result<&'a str, AgentError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::InvalidParams(format!("missing string field \"{name}\"")))
}

pub fn opt_str_field<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

pub fn u8_field(params: &Value, name: &str) -> Result<u8, AgentError> {
    params
        .get(name)
        .and_then(Value::as_u64)
        .filter(|v| *v <= u8::MAX as u64)
        .map(|v| v as u8)
        .ok_or_else(|| AgentError::InvalidParams(format!("missing or out-of-range byte field \"{name}\"")))
}

pub fn opt_u8_field(params: &Value, name: &str) -> Option<u8> {
    params.get(name).and_then(Value::as_u64).filter(|v| *v <= u8::MAX as u64).map(|v| v as u8)
}

pub fn u32_field(params: &Value, name: &str) -> Result<u32, AgentError> {
    params
        .get(name)
        .and_then(Value::as_u64)
        .filter(|v| *v <= u32::MAX as u64)
        .map(|v| v as u32)
        .ok_or_else(|| AgentError::InvalidParams(format!("missing or out-of-range field \"{name}\"")))
}

pub fn opt_i32_field(params: &Value, name: &str) -> Option<i32> {
    params.get(name).and_then(Value::as_i64).map(|v| v as i32)
}

/// `uint8[]`-shaped fields arrive as a JSON array of 0..=255 integers.
pub fn bytes_field(params: &Value, name: &str) -> Result<Vec<u8>, AgentError> {
    let arr = params
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::InvalidParams(format!("missing byte array field \"{name}\"")))?;
    arr.iter()
        .map(|v| {
            v.as_u64()
                .filter(|b| *b <= u8::MAX as u64)
                .map(|b| b as u8)
                .ok_or_else(|| AgentError::InvalidParams(format!("\"{name}\" must be an array of bytes")))
        })
        .collect()
}

pub fn bytes32_field(params: &Value, name: &str) -> Result<[u8; 32], AgentError> {
    let bytes = bytes_field(params, name)?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| AgentError::InvalidParams(format!("\"{name}\" must be exactly 32 bytes, got {}", v.len())))
}

pub fn device_id(params: &Value) -> Result<&str, AgentError> {
    str_field(params, "deviceId")
}
