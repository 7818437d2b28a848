//! `detectProtocols` (spec.md §4.5): runs the probe set matching
//! whichever transport is currently open.

use serde_json::{json, Value};

use crate::error::AgentError;
use crate::registry::{DeviceRegistry, OpenHandle};

pub fn detect_protocols(registry: &mut DeviceRegistry) -> Result<Value, AgentError> {
    let handle = registry.open_handle_mut()?;
    let caps = match handle {
        OpenHandle::Hid(hid) => sk_protocol::detect::detect_hid(hid),
        OpenHandle::Ccid(card) => sk_protocol::detect::detect_ccid(card),
    };
    Ok(json!({
        "protocols": {
            "fido2": caps.fido2,
            "u2f": caps.u2f,
            "piv": caps.piv,
            "openpgp": caps.openpgp,
            "otp": caps.otp,
            "ndef": caps.ndef,
        }
    }))
}
