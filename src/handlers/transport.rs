//! `listDevices`/`openDevice`/`closeDevice`/`sendHid`/`receiveHid`/
//! `transmitApdu` (spec.md §4.2–§4.4).

use serde_json::{json, Value};

use crate::error::AgentError;
use crate::registry::DeviceRegistry;

use super::params;

pub fn list_devices(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let devices = registry.list();
    Ok(json!({ "devices": devices }))
}

pub fn open_device(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    registry.open(self::params::device_id(params)?)?;
    Ok(json!({ "success": true }))
}

pub fn close_device(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    registry.close(self::params::device_id(params)?)?;
    Ok(json!({ "success": true }))
}

pub fn send_hid(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let _ = self::params::device_id(params)?;
    let data = self::params::bytes_field(params, "data")?;
    let handle = registry.open_handle_mut()?;
    let bytes_written = handle.as_hid()?.send_report(&data)?;
    Ok(json!({ "bytesWritten": bytes_written }))
}

pub fn receive_hid(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let _ = self::params::device_id(params)?;
    let timeout_ms = self::params::opt_i32_field(params, "timeout").unwrap_or_else(sk_transport_hid::HidTransport::default_timeout_ms);
    let handle = registry.open_handle_mut()?;
    let data = handle.as_hid()?.receive_report(timeout_ms)?;
    Ok(json!({ "data": data }))
}

pub fn transmit_apdu(registry: &mut DeviceRegistry, params: &Value) -> Result<Value, AgentError> {
    let _ = self::params::device_id(params)?;
    let raw = self::params::bytes_field(params, "apdu")?;
    let handle = registry.open_handle_mut()?;
    let card = handle.as_ccid_mut()?;
    let response = card.transmit_raw(&raw)?;
    Ok(json!({ "data": response }))
}
