//! CTAP2 engine (spec.md §4.6): CBOR command/response codec over the
//! `CMD_CBOR` CTAPHID command, `authenticatorGetInfo`, `credentialManagement`
//! and `reset`. PIN protocol v1 (key agreement, PIN encryption, `clientPIN`
//! subcommands) lives in [`pin`].

pub mod pin;

use std::collections::BTreeMap;

use ciborium::value::Value;
use log::{debug, warn};
use sk_transport_hid::ctaphid::{CtapHidChannel, CMD_CBOR};
use sk_transport_hid::HidTransport;
use thiserror::Error;

pub mod command {
    pub const MAKE_CREDENTIAL: u8 = 0x01;
    pub const GET_ASSERTION: u8 = 0x02;
    pub const GET_INFO: u8 = 0x04;
    pub const CLIENT_PIN: u8 = 0x06;
    pub const RESET: u8 = 0x07;
    pub const CREDENTIAL_MANAGEMENT: u8 = 0x0A;
}

/// CTAP2 status codes this agent distinguishes (spec.md §7's
/// `CTAP2_ERROR` carries one of these as its payload).
pub mod status {
    pub const OK: u8 = 0x00;
    pub const INVALID_COMMAND: u8 = 0x01;
    pub const INVALID_CBOR: u8 = 0x12;
    pub const MISSING_PARAMETER: u8 = 0x14;
    pub const NO_CREDENTIALS: u8 = 0x2E;
    pub const USER_ACTION_TIMEOUT: u8 = 0x2F;
    pub const NOT_ALLOWED: u8 = 0x30;
    pub const PIN_INVALID: u8 = 0x31;
    pub const PIN_BLOCKED: u8 = 0x32;
    pub const PIN_AUTH_INVALID: u8 = 0x33;
    pub const PIN_AUTH_BLOCKED: u8 = 0x34;
    pub const PIN_NOT_SET: u8 = 0x35;
    pub const PIN_REQUIRED: u8 = 0x36;
    pub const PIN_POLICY_VIOLATION: u8 = 0x37;
    pub const PIN_TOKEN_EXPIRED: u8 = 0x38;
    pub const UP_REQUIRED: u8 = 0x3B;
}

#[derive(Error, Debug)]
pub enum Ctap2Error {
    #[error(transparent)]
    Transport(#[from] sk_transport_hid::ctaphid::CtapHidError),
    #[error("empty response from authenticator")]
    EmptyResponse,
    #[error("malformed CBOR: {0}")]
    Cbor(String),
    #[error("authenticator returned status {0:#04x}")]
    Status(u8),
}

/// Authenticator round-trips outside detection (`makeCredential`-style
/// operations, PIN ceremonies) get this long a wait, since they may be
/// blocked on user presence rather than a stalled device.
const DEFAULT_CBOR_TIMEOUT_MS: i32 = 30_000;

/// Send one CTAP2 command (`cmd_byte` + optional CBOR-encoded parameter
/// map) and return the decoded response payload. A non-zero leading status
/// byte is the authenticator's CTAP2 error and is surfaced as
/// [`Ctap2Error::Status`] so callers can translate the specific codes they
/// care about (`PIN_INVALID`, `USER_ACTION_TIMEOUT`, ...).
pub fn cbor_exchange(
    hid: &HidTransport,
    channel: &CtapHidChannel,
    cmd_byte: u8,
    params: Option<Value>,
) -> Result<Value, Ctap2Error> {
    cbor_exchange_with_timeout(hid, channel, cmd_byte, params, DEFAULT_CBOR_TIMEOUT_MS)
}

/// As [`cbor_exchange`], but with an explicit response timeout — used by
/// the detection engine to bound a `getInfo` probe.
pub fn cbor_exchange_with_timeout(
    hid: &HidTransport,
    channel: &CtapHidChannel,
    cmd_byte: u8,
    params: Option<Value>,
    timeout_ms: i32,
) -> Result<Value, Ctap2Error> {
    let mut request = vec![cmd_byte];
    if let Some(params) = params {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&params, &mut buf)
            .map_err(|e| Ctap2Error::Cbor(e.to_string()))?;
        request.extend_from_slice(&buf);
    }

    channel.send(hid, CMD_CBOR, &request)?;
    let (_, payload) = channel.receive(hid, timeout_ms)?;

    let status = *payload.first().ok_or(Ctap2Error::EmptyResponse)?;
    if status != status::OK {
        warn!("CTAP2 command {:#04x} failed with status {:#04x}", cmd_byte, status);
        return Err(Ctap2Error::Status(status));
    }

    if payload.len() == 1 {
        return Ok(Value::Null);
    }
    ciborium::de::from_reader(&payload[1..]).map_err(|e| Ctap2Error::Cbor(e.to_string()))
}

fn map_get<'a>(map: &'a [(Value, Value)], key: i128) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_integer().map(|i| i128::from(i)) == Some(key))
        .map(|(_, v)| v)
}

#[derive(Clone, Debug, Default)]
pub struct GetInfoResponse {
    pub versions: Vec<String>,
    pub extensions: Vec<String>,
    pub aaguid: Vec<u8>,
    pub options: BTreeMap<String, bool>,
    pub max_msg_size: Option<u32>,
    pub pin_uv_auth_protocols: Vec<u8>,
    pub min_pin_length: Option<u8>,
}

impl GetInfoResponse {
    pub fn client_pin_set(&self) -> bool {
        self.options.get("clientPin").copied().unwrap_or(false)
    }
}

fn decode_get_info(value: &Value) -> Result<GetInfoResponse, Ctap2Error> {
    let map = value
        .as_map()
        .ok_or_else(|| Ctap2Error::Cbor("getInfo response is not a map".into()))?;

    let mut out = GetInfoResponse::default();

    if let Some(v) = map_get(map, 1) {
        out.versions = v
            .as_array()
            .map(|a| a.iter().filter_map(|s| s.as_text().map(str::to_string)).collect())
            .unwrap_or_default();
    }
    if let Some(v) = map_get(map, 2) {
        out.extensions = v
            .as_array()
            .map(|a| a.iter().filter_map(|s| s.as_text().map(str::to_string)).collect())
            .unwrap_or_default();
    }
    if let Some(v) = map_get(map, 3) {
        out.aaguid = v.as_bytes().cloned().unwrap_or_default();
    }
    if let Some(v) = map_get(map, 4) {
        if let Some(opts) = v.as_map() {
            for (k, v) in opts {
                if let (Some(name), Some(b)) = (k.as_text(), v.as_bool()) {
                    out.options.insert(name.to_string(), b);
                }
            }
        }
    }
    if let Some(v) = map_get(map, 5) {
        out.max_msg_size = v.as_integer().map(|i| i128::from(i) as u32);
    }
    if let Some(v) = map_get(map, 6) {
        out.pin_uv_auth_protocols = v
            .as_array()
            .map(|a| a.iter().filter_map(|x| x.as_integer().map(|i| i128::from(i) as u8)).collect())
            .unwrap_or_default();
    }
    if let Some(v) = map_get(map, 13) {
        out.min_pin_length = v.as_integer().map(|i| i128::from(i) as u8);
    }

    Ok(out)
}

/// `authenticatorGetInfo` (command 0x04).
pub fn get_info(hid: &HidTransport, channel: &CtapHidChannel) -> Result<GetInfoResponse, Ctap2Error> {
    get_info_with_timeout(hid, channel, DEFAULT_CBOR_TIMEOUT_MS)
}

/// As [`get_info`], but with an explicit response timeout — the detection
/// engine's `fido2` probe.
pub fn get_info_with_timeout(hid: &HidTransport, channel: &CtapHidChannel, timeout_ms: i32) -> Result<GetInfoResponse, Ctap2Error> {
    let value = cbor_exchange_with_timeout(hid, channel, command::GET_INFO, None, timeout_ms)?;
    decode_get_info(&value)
}

/// `authenticatorReset` (command 0x07). Must be invoked within roughly 10
/// seconds of the authenticator powering on and requires user presence;
/// the authenticator itself enforces both and reports `UP_REQUIRED`/
/// `USER_ACTION_TIMEOUT`/`NOT_ALLOWED` distinctly — this function only
/// forwards whichever status it receives.
pub fn reset(hid: &HidTransport, channel: &CtapHidChannel) -> Result<(), Ctap2Error> {
    cbor_exchange(hid, channel, command::RESET, None)?;
    debug!("authenticatorReset completed");
    Ok(())
}

pub mod credential_management {
    use super::*;

    pub mod subcommand {
        pub const GET_CREDS_METADATA: u8 = 0x01;
        pub const ENUMERATE_RPS_BEGIN: u8 = 0x02;
        pub const ENUMERATE_RPS_GET_NEXT: u8 = 0x03;
        pub const ENUMERATE_CREDENTIALS_BEGIN: u8 = 0x04;
        pub const ENUMERATE_CREDENTIALS_GET_NEXT: u8 = 0x05;
        pub const DELETE_CREDENTIAL: u8 = 0x06;
    }

    #[derive(Clone, Debug)]
    pub struct RelyingParty {
        pub rp_id: String,
        pub rp_id_hash: Vec<u8>,
    }

    #[derive(Clone, Debug)]
    pub struct Credential {
        pub credential_id: Vec<u8>,
        pub user_id: Vec<u8>,
        pub user_name: Option<String>,
    }

    fn build_request(
        subcommand: u8,
        rp_id_hash: Option<&[u8]>,
        credential_id: Option<&[u8]>,
        pin_uv_auth_protocol: Option<u8>,
        pin_uv_auth_param: Option<&[u8]>,
    ) -> Value {
        let mut entries: Vec<(Value, Value)> = vec![(Value::Integer(1.into()), Value::Integer((subcommand as i64).into()))];
        let mut params: Vec<(Value, Value)> = Vec::new();
        if let Some(rp_hash) = rp_id_hash {
            params.push((
                Value::Integer(1.into()),
                Value::Bytes(rp_hash.to_vec()),
            ));
        }
        if let Some(cred_id) = credential_id {
            let cred_descriptor = Value::Map(vec![
                (Value::Text("id".into()), Value::Bytes(cred_id.to_vec())),
                (Value::Text("type".into()), Value::Text("public-key".into())),
            ]);
            params.push((Value::Integer(2.into()), cred_descriptor));
        }
        if !params.is_empty() {
            entries.push((Value::Integer(2.into()), Value::Map(params)));
        }
        if let Some(proto) = pin_uv_auth_protocol {
            entries.push((Value::Integer(3.into()), Value::Integer((proto as i64).into())));
        }
        if let Some(param) = pin_uv_auth_param {
            entries.push((Value::Integer(4.into()), Value::Bytes(param.to_vec())));
        }
        Value::Map(entries)
    }

    /// `getCredsMetadata`: returns `(existing_count, max_remaining_count)`.
    pub fn get_creds_metadata(
        hid: &HidTransport,
        channel: &CtapHidChannel,
        pin_uv_auth_protocol: u8,
        pin_uv_auth_param: &[u8],
    ) -> Result<(u32, u32), Ctap2Error> {
        let req = build_request(
            subcommand::GET_CREDS_METADATA,
            None,
            None,
            Some(pin_uv_auth_protocol),
            Some(pin_uv_auth_param),
        );
        let resp = cbor_exchange(hid, channel, command::CREDENTIAL_MANAGEMENT, Some(req))?;
        let map = resp.as_map().ok_or_else(|| Ctap2Error::Cbor("not a map".into()))?;
        let existing = map_get(map, 1).and_then(|v| v.as_integer()).map(|i| i128::from(i) as u32).unwrap_or(0);
        let remaining = map_get(map, 2).and_then(|v| v.as_integer()).map(|i| i128::from(i) as u32).unwrap_or(0);
        Ok((existing, remaining))
    }

    /// `enumerateRPs`: an empty list is a valid, non-error result.
    pub fn enumerate_rps(
        hid: &HidTransport,
        channel: &CtapHidChannel,
        pin_uv_auth_protocol: u8,
        pin_uv_auth_param: &[u8],
    ) -> Result<Vec<RelyingParty>, Ctap2Error> {
        let req = build_request(
            subcommand::ENUMERATE_RPS_BEGIN,
            None,
            None,
            Some(pin_uv_auth_protocol),
            Some(pin_uv_auth_param),
        );
        let first = match cbor_exchange(hid, channel, command::CREDENTIAL_MANAGEMENT, Some(req)) {
            Ok(v) => v,
            Err(Ctap2Error::Status(status::NO_CREDENTIALS)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = vec![parse_rp(&first)?];
        let total = first
            .as_map()
            .and_then(|m| map_get(m, 4))
            .and_then(|v| v.as_integer())
            .map(|i| i128::from(i) as usize)
            .unwrap_or(1);

        for _ in 1..total {
            let req = build_request(subcommand::ENUMERATE_RPS_GET_NEXT, None, None, None, None);
            let v = cbor_exchange(hid, channel, command::CREDENTIAL_MANAGEMENT, Some(req))?;
            out.push(parse_rp(&v)?);
        }
        Ok(out)
    }

    fn parse_rp(v: &Value) -> Result<RelyingParty, Ctap2Error> {
        let map = v.as_map().ok_or_else(|| Ctap2Error::Cbor("rp entry not a map".into()))?;
        let rp_id = map_get(map, 3)
            .and_then(|rp| rp.as_map())
            .and_then(|rp_map| rp_map.iter().find(|(k, _)| k.as_text() == Some("id")))
            .and_then(|(_, v)| v.as_text())
            .unwrap_or_default()
            .to_string();
        let rp_id_hash = map_get(map, 4).and_then(|v| v.as_bytes()).cloned().unwrap_or_default();
        Ok(RelyingParty { rp_id, rp_id_hash })
    }

    /// `enumerateCredentials` for one relying party. An empty list is
    /// valid, not an error.
    pub fn enumerate_credentials(
        hid: &HidTransport,
        channel: &CtapHidChannel,
        rp_id_hash: &[u8],
        pin_uv_auth_protocol: u8,
        pin_uv_auth_param: &[u8],
    ) -> Result<Vec<Credential>, Ctap2Error> {
        let req = build_request(
            subcommand::ENUMERATE_CREDENTIALS_BEGIN,
            Some(rp_id_hash),
            None,
            Some(pin_uv_auth_protocol),
            Some(pin_uv_auth_param),
        );
        let first = match cbor_exchange(hid, channel, command::CREDENTIAL_MANAGEMENT, Some(req)) {
            Ok(v) => v,
            Err(Ctap2Error::Status(status::NO_CREDENTIALS)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = vec![parse_credential(&first)?];
        let total = first
            .as_map()
            .and_then(|m| map_get(m, 9))
            .and_then(|v| v.as_integer())
            .map(|i| i128::from(i) as usize)
            .unwrap_or(1);

        for _ in 1..total {
            let req = build_request(subcommand::ENUMERATE_CREDENTIALS_GET_NEXT, None, None, None, None);
            let v = cbor_exchange(hid, channel, command::CREDENTIAL_MANAGEMENT, Some(req))?;
            out.push(parse_credential(&v)?);
        }
        Ok(out)
    }

    fn parse_credential(v: &Value) -> Result<Credential, Ctap2Error> {
        let map = v.as_map().ok_or_else(|| Ctap2Error::Cbor("credential entry not a map".into()))?;
        let user_map = map_get(map, 7).and_then(|u| u.as_map());
        let user_id = user_map
            .and_then(|u| u.iter().find(|(k, _)| k.as_text() == Some("id")))
            .and_then(|(_, v)| v.as_bytes())
            .cloned()
            .unwrap_or_default();
        let user_name = user_map
            .and_then(|u| u.iter().find(|(k, _)| k.as_text() == Some("name")))
            .and_then(|(_, v)| v.as_text())
            .map(str::to_string);
        let credential_id = map_get(map, 6)
            .and_then(|d| d.as_map())
            .and_then(|d| d.iter().find(|(k, _)| k.as_text() == Some("id")))
            .and_then(|(_, v)| v.as_bytes())
            .cloned()
            .unwrap_or_default();
        Ok(Credential {
            credential_id,
            user_id,
            user_name,
        })
    }

    /// `deleteCredential`.
    pub fn delete_credential(
        hid: &HidTransport,
        channel: &CtapHidChannel,
        credential_id: &[u8],
        pin_uv_auth_protocol: u8,
        pin_uv_auth_param: &[u8],
    ) -> Result<(), Ctap2Error> {
        let req = build_request(
            subcommand::DELETE_CREDENTIAL,
            None,
            Some(credential_id),
            Some(pin_uv_auth_protocol),
            Some(pin_uv_auth_param),
        );
        cbor_exchange(hid, channel, command::CREDENTIAL_MANAGEMENT, Some(req))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_get_info() {
        let value = Value::Map(vec![
            (
                Value::Integer(1.into()),
                Value::Array(vec![Value::Text("FIDO_2_0".into())]),
            ),
            (
                Value::Integer(4.into()),
                Value::Map(vec![(Value::Text("clientPin".into()), Value::Bool(true))]),
            ),
        ]);
        let info = decode_get_info(&value).unwrap();
        assert_eq!(info.versions, vec!["FIDO_2_0".to_string()]);
        assert!(info.client_pin_set());
    }
}
