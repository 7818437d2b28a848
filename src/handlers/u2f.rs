//! CTAP1/U2F handlers (spec.md §4.7): `u2fVersion`, `u2fRegister`,
//! `u2fAuthenticate`.

use serde_json::{json, Value};
use sk_transport_hid::ctaphid::CtapHidChannel;

use crate::error::AgentError;
use crate::registry::DeviceRegistry;

use super::params;

pub fn version(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = CtapHidChannel::init(hid, rand::random())?;
    let version = sk_protocol::ctap1::version(hid, &channel)?;
    Ok(json!({ "version": version }))
}

pub fn register(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let challenge_hash = self::params::bytes32_field(params, "challengeHash")?;
    let app_id_hash = self::params::bytes32_field(params, "appIdHash")?;

    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = CtapHidChannel::init(hid, rand::random())?;
    let response = sk_protocol::ctap1::register(hid, &channel, &challenge_hash, &app_id_hash)?;

    Ok(json!({
        "publicKey": hex::encode(&response.public_key),
        "keyHandle": hex::encode(&response.key_handle),
        "attestationCertificate": hex::encode(&response.attestation_certificate),
        "signature": hex::encode(&response.signature),
    }))
}

pub fn authenticate(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let challenge_hash = self::params::bytes32_field(params, "challengeHash")?;
    let app_id_hash = self::params::bytes32_field(params, "appIdHash")?;
    let key_handle_hex = self::params::str_field(params, "keyHandle")?;
    let key_handle = hex::decode(key_handle_hex).map_err(|e| AgentError::InvalidParams(e.to_string()))?;
    let control = self::params::opt_u8_field(params, "ctrl").unwrap_or(sk_protocol::ctap1::ctrl::ENFORCE_USER_PRESENCE_AND_SIGN);

    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = CtapHidChannel::init(hid, rand::random())?;
    let response = sk_protocol::ctap1::authenticate(hid, &channel, &challenge_hash, &app_id_hash, &key_handle, control)?;

    Ok(json!({
        "userPresence": response.user_presence,
        "counter": response.counter,
        "signature": hex::encode(&response.signature),
    }))
}
