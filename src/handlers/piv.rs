//! PIV handlers (spec.md §4.8).

use serde_json::{json, Value};
use sk_protocol::ApduLog;

use crate::error::AgentError;
use crate::registry::DeviceRegistry;

use super::params;

/// `pivGetData`: a composite call — SELECT, then every well-known slot's
/// certificate metadata, all folded into one APDU activity log.
pub fn get_data(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::piv::select(card, &mut log)?;
    let slots = sk_protocol::piv::enumerate_slots(card, &mut log);
    Ok(json!({ "slots": slots, "apduLog": log.0 }))
}

pub fn verify_pin(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let pin = self::params::str_field(params, "pin")?;
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::piv::select(card, &mut log)?;
    sk_protocol::piv::verify_pin(card, &mut log, Some(pin))?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

pub fn change_pin(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let current_pin = self::params::str_field(params, "currentPin")?;
    let new_pin = self::params::str_field(params, "newPin")?;
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::piv::select(card, &mut log)?;
    sk_protocol::piv::change_pin(card, &mut log, current_pin, new_pin)?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

pub fn change_puk(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let current_puk = self::params::str_field(params, "currentPuk")?;
    let new_puk = self::params::str_field(params, "newPuk")?;
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::piv::select(card, &mut log)?;
    sk_protocol::piv::change_puk(card, &mut log, current_puk, new_puk)?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

pub fn generate_key(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let slot = self::params::u8_field(params, "slot")?;
    let algorithm = self::params::u8_field(params, "algorithm")?;
    let pin_policy = self::params::opt_u8_field(params, "pinPolicy");
    let touch_policy = self::params::opt_u8_field(params, "touchPolicy");
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::piv::select(card, &mut log)?;
    let public_key = sk_protocol::piv::generate_key_pair(card, &mut log, slot, algorithm, pin_policy, touch_policy)?;
    Ok(json!({ "publicKey": hex::encode(&public_key), "apduLog": log.0 }))
}

/// `pivImportCertificate`: writes a DER certificate into the slot's `GET
/// DATA` object via `PUT DATA`, wrapped in the same `53`/`70`/`71` TLV a
/// card emits on read (spec.md §4.8 names only the read path; the write
/// side mirrors it so `pivReadCertificate` can read back what was just
/// imported).
pub fn import_certificate(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let slot = self::params::u8_field(params, "slot")?;
    let cert_hex = self::params::str_field(params, "certificate")?;
    let cert_der = hex::decode(cert_hex).map_err(|e| AgentError::InvalidParams(e.to_string()))?;

    let mut object = vec![0x70];
    push_der_len(&mut object, cert_der.len());
    object.extend_from_slice(&cert_der);
    object.extend_from_slice(&[0x71, 0x01, 0x00]); // uncompressed, no LRC
    let mut wrapped = vec![0x53];
    push_der_len(&mut wrapped, object.len());
    wrapped.extend_from_slice(&object);

    let tag = sk_protocol::piv_slots::cert_object_tag(slot);
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::piv::select(card, &mut log)?;
    put_data(card, &mut log, &tag, &wrapped)?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

pub fn read_certificate(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let slot = self::params::u8_field(params, "slot")?;
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::piv::select(card, &mut log)?;
    let slots = sk_protocol::piv::enumerate_slots(card, &mut log);
    let record = slots.into_iter().find(|s| s.slot_id == slot);
    Ok(json!({ "slot": record, "apduLog": log.0 }))
}

/// `pivDeleteCertificate`: `PUT DATA` with an empty value clears the
/// object (no dedicated "delete" APDU in PIV).
pub fn delete_certificate(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let slot = self::params::u8_field(params, "slot")?;
    let tag = sk_protocol::piv_slots::cert_object_tag(slot);
    let card = registry.open_handle_mut()?.as_ccid_mut()?;
    let mut log = ApduLog::new();
    sk_protocol::piv::select(card, &mut log)?;
    put_data(card, &mut log, &tag, &[])?;
    Ok(json!({ "success": true, "apduLog": log.0 }))
}

fn put_data(
    card: &mut sk_transport_ccid::CcidTransport,
    log: &mut ApduLog,
    object_tag: &[u8; 3],
    value: &[u8],
) -> Result<(), AgentError> {
    let mut tlv_tag = vec![0x5C, object_tag.len() as u8];
    tlv_tag.extend_from_slice(object_tag);
    let mut data = tlv_tag;
    data.push(0x53);
    push_der_len(&mut data, value.len());
    data.extend_from_slice(value);

    let apdu = sk_apdu::ApduCommand::new(0x00, 0xDB, 0x3F, 0xFF, data);
    let answer = sk_transport_ccid::exchange(card, &apdu)?;
    log.push(sk_protocol::ApduLogEntry::record("PUT DATA", &apdu.serialize_extended(), &answer));
    if !answer.is_success() {
        return Err(AgentError::ApduError(answer.sw()));
    }
    Ok(())
}

fn push_der_len(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
    } else if len <= 0xFF {
        buf.push(0x81);
        buf.push(len as u8);
    } else {
        buf.push(0x82);
        buf.push((len >> 8) as u8);
        buf.push((len & 0xFF) as u8);
    }
}
