//! FIDO2/CTAP2 handlers (spec.md §4.6): `fido2GetInfo`, `fido2SetPin`,
//! `fido2ChangePin`, `fido2GetPinRetries`, `fido2ListCredentials`,
//! `fido2DeleteCredential`, `fido2ResetDevice`.

use serde_json::{json, Value};
use sk_protocol::ctap2::credential_management;
use sk_protocol::ctap2::pin::{PinSession, PIN_UV_AUTH_PROTOCOL_ONE};
use sk_transport_hid::ctaphid::CtapHidChannel;
use sk_transport_hid::HidTransport;

use crate::error::AgentError;
use crate::registry::DeviceRegistry;

use super::params;

fn open_channel(hid: &HidTransport) -> Result<CtapHidChannel, AgentError> {
    Ok(CtapHidChannel::init(hid, rand::random())?)
}

pub fn get_info(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = open_channel(hid)?;
    let info = sk_protocol::ctap2::get_info(hid, &channel)?;
    Ok(json!({
        "versions": info.versions,
        "extensions": info.extensions,
        "aaguid": hex::encode(&info.aaguid),
        "options": info.options,
        "maxMsgSize": info.max_msg_size,
        "pinUvAuthProtocols": info.pin_uv_auth_protocols,
        "minPinLength": info.min_pin_length,
    }))
}

pub fn set_pin(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let new_pin = self::params::str_field(params, "newPin")?;
    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = open_channel(hid)?;

    let info = sk_protocol::ctap2::get_info(hid, &channel)?;
    if info.client_pin_set() {
        return Err(AgentError::PinAlreadySet);
    }

    let session = PinSession::establish(hid, &channel)?;
    session.set_pin(hid, &channel, new_pin)?;
    Ok(json!({ "success": true }))
}

pub fn change_pin(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let current_pin = self::params::str_field(params, "currentPin")?;
    let new_pin = self::params::str_field(params, "newPin")?;
    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = open_channel(hid)?;
    let session = PinSession::establish(hid, &channel)?;
    session.change_pin(hid, &channel, current_pin, new_pin)?;
    Ok(json!({ "success": true }))
}

pub fn get_pin_retries(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = open_channel(hid)?;
    let retries = PinSession::get_pin_retries(hid, &channel)?;
    Ok(json!({ "retries": retries }))
}

pub fn list_credentials(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let pin = self::params::str_field(params, "pin")?;
    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = open_channel(hid)?;
    let session = PinSession::establish(hid, &channel)?;
    let token = session.get_pin_token(hid, &channel, pin)?;

    let rp_enum_auth_param = token.auth_param(&[]);
    let rps = credential_management::enumerate_rps(hid, &channel, PIN_UV_AUTH_PROTOCOL_ONE, &rp_enum_auth_param)?;
    let mut credentials = Vec::new();
    for rp in rps {
        let auth_param = token.auth_param(&rp.rp_id_hash);
        let creds = credential_management::enumerate_credentials(hid, &channel, &rp.rp_id_hash, PIN_UV_AUTH_PROTOCOL_ONE, &auth_param)?;
        for cred in creds {
            credentials.push(json!({
                "rpId": rp.rp_id,
                "credentialId": hex::encode(&cred.credential_id),
                "userId": hex::encode(&cred.user_id),
                "userName": cred.user_name,
            }));
        }
    }
    Ok(json!({ "credentials": credentials }))
}

pub fn delete_credential(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let credential_id_hex = self::params::str_field(params, "credentialId")?;
    let pin = self::params::str_field(params, "pin")?;
    let credential_id = hex::decode(credential_id_hex).map_err(|e| AgentError::InvalidParams(e.to_string()))?;

    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = open_channel(hid)?;
    let session = PinSession::establish(hid, &channel)?;
    let token = session.get_pin_token(hid, &channel, pin)?;
    let auth_param = token.auth_param(&credential_id);
    credential_management::delete_credential(hid, &channel, &credential_id, PIN_UV_AUTH_PROTOCOL_ONE, &auth_param)?;
    Ok(json!({ "success": true }))
}

pub fn reset_device(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let hid = registry.open_handle_mut()?.as_hid()?;
    let channel = open_channel(hid)?;
    sk_protocol::ctap2::reset(hid, &channel)?;
    Ok(json!({ "success": true }))
}
