//! OTP handlers (spec.md §4.10): `otpReadSlot`, `otpWriteSlot`,
//! `otpDeleteSlot`, `otpSwapSlots`, `otpGenerateSeed`.

use serde_json::{json, Value};

use crate::error::AgentError;
use crate::registry::DeviceRegistry;

use super::params;

fn slot_from_params(params: &Value) -> Result<u8, AgentError> {
    let slot = self::params::u8_field(params, "slot")?;
    match slot {
        sk_protocol::otp::slot::SHORT_PRESS | sk_protocol::otp::slot::LONG_PRESS => Ok(slot),
        other => Err(AgentError::InvalidParams(format!("slot must be 1 or 2, got {other}"))),
    }
}

pub fn read_slot(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let slot = slot_from_params(params)?;
    let hid = registry.open_handle_mut()?.as_hid()?;
    let statuses = sk_protocol::otp::read_status(hid)?;
    let status = statuses.into_iter().find(|s| s.slot == slot);
    Ok(json!({
        "slot": slot,
        "configured": status.as_ref().map(|s| s.configured).unwrap_or(false),
        "touchLevel": status.as_ref().map(|s| s.touch_level).unwrap_or(0),
    }))
}

pub fn write_slot(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let slot = slot_from_params(params)?;
    let seed_text = self::params::str_field(params, "seed")?;
    let seed = sk_protocol::otp::normalize_seed(seed_text)?;
    let hid = registry.open_handle_mut()?.as_hid()?;
    sk_protocol::otp::write_seed(hid, slot, &seed)?;
    Ok(json!({ "success": true }))
}

pub fn delete_slot(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let slot = slot_from_params(params)?;
    let hid = registry.open_handle_mut()?.as_hid()?;
    sk_protocol::otp::delete_slot(hid, slot)?;
    Ok(json!({ "success": true }))
}

/// `otpSwapSlots`: checks both slots' configuration state before and
/// after the swap so a silent no-op on the wire reads as success only
/// when the device actually flipped them (spec.md §9's resolved Open
/// Question — best-effort, no seed content to restore since the
/// protocol never reads a seed back out of a slot).
pub fn swap_slots(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let hid = registry.open_handle_mut()?.as_hid()?;
    let before = sk_protocol::otp::read_status(hid)?;
    sk_protocol::otp::swap_slots(hid)?;
    let after = sk_protocol::otp::read_status(hid)?;
    Ok(json!({
        "success": true,
        "before": before.iter().map(|s| json!({"slot": s.slot, "configured": s.configured})).collect::<Vec<_>>(),
        "after": after.iter().map(|s| json!({"slot": s.slot, "configured": s.configured})).collect::<Vec<_>>(),
    }))
}

/// `otpGenerateSeed`: returns a 32-character Base32 string (spec.md §8
/// scenario S6), generated from 20 random bytes (RFC 4226's own test
/// seed length) rather than a byte count chosen to hit 32 characters
/// exactly, then Base32-encoded.
pub fn generate_seed(params: &Value) -> Result<Value, AgentError> {
    let length = self::params::opt_u8_field(params, "length").unwrap_or(20) as usize;
    let seed = sk_protocol::otp::generate_seed(length);
    let encoded = base32::encode(base32::Alphabet::RFC4648 { padding: false }, &seed);
    Ok(json!({ "seed": encoded }))
}
