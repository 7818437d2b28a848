//! OpenPGP handlers (spec.md §4.9).

use serde_json::{json, Value};
use sk_protocol::ApduLog;

use crate::error::AgentError;
use crate::registry::DeviceRegistry;

use super::params;

pub fn select(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::openpgp::select(card, &mut log)?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

pub fn read_data(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::openpgp::select(card, &mut log)?;
    let cardholder_name = sk_protocol::openpgp::read_cardholder_name(card, &mut log)?;
    let url = sk_protocol::openpgp::read_url(card, &mut log)?;
    Ok(json!({ "cardholderName": cardholder_name, "url": url, "apduLog": log.0 }))
}

pub fn change_pin(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let current_pin = self::params::str_field(params, "currentPin")?;
    let new_pin = self::params::str_field(params, "newPin")?;
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::openpgp::select(card, &mut log)?;
    sk_protocol::openpgp::change_pw1(card, &mut log, current_pin, new_pin)?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

pub fn change_admin_pin(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let current_pin = self::params::str_field(params, "currentPin")?;
    let new_pin = self::params::str_field(params, "newPin")?;
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::openpgp::select(card, &mut log)?;
    sk_protocol::openpgp::change_pw3(card, &mut log, current_pin, new_pin)?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

pub fn import_key(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let slot_name = self::params::str_field(params, "slot")?;
    let slot = slot_from_name(slot_name)?;
    let admin_pin = self::params::str_field(params, "adminPin")?;
    let key_data_hex = self::params::str_field(params, "keyData")?;
    let key_data = hex::decode(key_data_hex).map_err(|e| AgentError::InvalidParams(e.to_string()))?;

    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::openpgp::select(card, &mut log)?;
    sk_protocol::openpgp::verify_pw3(card, &mut log, admin_pin)?;
    sk_protocol::openpgp::import_key(card, &mut log, slot, &key_data)?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

pub fn export_public_key(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let slot_name = self::params::str_field(params, "slot")?;
    let _ = slot_from_name(slot_name)?;

    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::openpgp::select(card, &mut log)?;

    let mut data = Vec::new();
    let mut offset = 0u16;
    loop {
        let chunk = sk_protocol::openpgp::read_binary(card, &mut log, offset)?;
        if chunk.is_empty() {
            break;
        }
        offset += chunk.len() as u16;
        data.extend_from_slice(&chunk);
        if chunk.len() < 0xFF {
            break;
        }
    }
    Ok(json!({ "publicKey": hex::encode(&data), "apduLog": log.0 }))
}

fn slot_from_name(name: &str) -> Result<[u8; 2], AgentError> {
    match name {
        "signature" => Ok(sk_protocol::openpgp::key_slot::SIGNATURE),
        "decryption" => Ok(sk_protocol::openpgp::key_slot::DECRYPTION),
        "authentication" => Ok(sk_protocol::openpgp::key_slot::AUTHENTICATION),
        other => Err(AgentError::InvalidParams(format!("unknown OpenPGP key slot {other:?}"))),
    }
}
