//! NDEF handlers (spec.md §4.11): `ndefRead`, `ndefWrite`, `ndefFormat`.

use serde_json::{json, Value};
use sk_protocol::ApduLog;

use crate::error::AgentError;
use crate::registry::DeviceRegistry;

use super::params;

pub fn read(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::ndef::select_and_read_capabilities(card, &mut log)?;
    let message = sk_protocol::ndef::read_message(card, &mut log)?;
    Ok(json!({ "message": hex::encode(&message), "apduLog": log.0 }))
}

pub fn write(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let message_hex = self::params::str_field(params, "message")?;
    let message = hex::decode(message_hex).map_err(|e| AgentError::InvalidParams(e.to_string()))?;

    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    let capabilities = sk_protocol::ndef::select_and_read_capabilities(card, &mut log)?;
    sk_protocol::ndef::write_message(card, &mut log, &capabilities, &message)?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

/// `ndefFormat`: writes a zero-length NDEF message, clearing the tag
/// without altering its capability container.
pub fn format(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    let capabilities = sk_protocol::ndef::select_and_read_capabilities(card, &mut log)?;
    sk_protocol::ndef::write_message(card, &mut log, &capabilities, &[])?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}
