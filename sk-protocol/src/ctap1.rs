//! CTAP1/U2F engine (spec.md §4.7): `U2F_VERSION`, `U2F_REGISTER`,
//! `U2F_AUTHENTICATE` carried as ISO-7816 APDUs inside CTAPHID `MSG`
//! frames, with bounded user-presence retry on `6985`.

use std::time::{Duration, Instant};

use log::{debug, warn};
use sk_apdu::{ApduAnswer, ApduCommand};
use sk_transport_hid::ctaphid::{CtapHidChannel, CMD_MSG};
use sk_transport_hid::HidTransport;
use thiserror::Error;

const CLA: u8 = 0x00;
const INS_REGISTER: u8 = 0x01;
const INS_AUTHENTICATE: u8 = 0x02;
const INS_VERSION: u8 = 0x03;

/// `P1` control byte for `U2F_AUTHENTICATE`.
pub mod ctrl {
    pub const CHECK_ONLY: u8 = 0x07;
    pub const ENFORCE_USER_PRESENCE_AND_SIGN: u8 = 0x03;
    pub const DONT_ENFORCE_USER_PRESENCE: u8 = 0x08;
}

const USER_PRESENCE_RETRY_BUDGET: Duration = Duration::from_secs(30);
const USER_PRESENCE_POLL_INTERVAL_MS: i32 = 500;

#[derive(Error, Debug)]
pub enum U2fError {
    #[error(transparent)]
    Transport(#[from] sk_transport_hid::ctaphid::CtapHidError),
    #[error(transparent)]
    Answer(#[from] sk_apdu::ApduAnswerError),
    #[error("user did not present within the retry budget")]
    UserPresenceTimeout,
    #[error("U2F device error, status word {sw1:02X}{sw2:02X}")]
    DeviceError { sw1: u8, sw2: u8 },
}

fn exchange(
    hid: &HidTransport,
    channel: &CtapHidChannel,
    apdu: &ApduCommand,
) -> Result<ApduAnswer, U2fError> {
    exchange_with_timeout(hid, channel, apdu, HidTransport::default_timeout_ms())
}

fn exchange_with_timeout(
    hid: &HidTransport,
    channel: &CtapHidChannel,
    apdu: &ApduCommand,
    timeout_ms: i32,
) -> Result<ApduAnswer, U2fError> {
    channel.send(hid, CMD_MSG, &apdu.serialize())?;
    let (_, payload) = channel.receive(hid, timeout_ms)?;
    Ok(ApduAnswer::from_bytes(payload)?)
}

/// Runs `apdu`, retrying while the device answers `6985` (conditions not
/// satisfied / user presence required), up to a 30 s total budget, polling
/// at a fixed interval the way a human touches the button.
fn exchange_with_presence_retry(
    hid: &HidTransport,
    channel: &CtapHidChannel,
    apdu: &ApduCommand,
) -> Result<ApduAnswer, U2fError> {
    let deadline = Instant::now() + USER_PRESENCE_RETRY_BUDGET;
    loop {
        let answer = exchange(hid, channel, apdu)?;
        if answer.is_success() {
            return Ok(answer);
        }
        if answer.sw() == 0x6985 {
            if Instant::now() >= deadline {
                warn!("U2F user presence not observed within 30s budget");
                return Err(U2fError::UserPresenceTimeout);
            }
            debug!("U2F 6985: waiting for user presence, retrying");
            std::thread::sleep(Duration::from_millis(USER_PRESENCE_POLL_INTERVAL_MS as u64));
            continue;
        }
        return Err(U2fError::DeviceError {
            sw1: answer.sw1,
            sw2: answer.sw2,
        });
    }
}

/// `U2F_VERSION`: support is implied by a response ending `9000` whose
/// payload decodes to ASCII `U2F_V2` (used by the detection engine).
pub fn version(hid: &HidTransport, channel: &CtapHidChannel) -> Result<String, U2fError> {
    version_with_timeout(hid, channel, HidTransport::default_timeout_ms())
}

/// As [`version`], but with an explicit response timeout — the detection
/// engine's `u2f` probe.
pub fn version_with_timeout(hid: &HidTransport, channel: &CtapHidChannel, timeout_ms: i32) -> Result<String, U2fError> {
    let apdu = ApduCommand::new(CLA, INS_VERSION, 0x00, 0x00, Vec::new());
    let answer = exchange_with_timeout(hid, channel, &apdu, timeout_ms)?;
    if !answer.is_success() {
        return Err(U2fError::DeviceError {
            sw1: answer.sw1,
            sw2: answer.sw2,
        });
    }
    Ok(String::from_utf8_lossy(answer.data()).to_string())
}

#[derive(Clone, Debug)]
pub struct RegisterResponse {
    pub public_key: Vec<u8>,
    pub key_handle: Vec<u8>,
    pub attestation_certificate: Vec<u8>,
    pub signature: Vec<u8>,
}

/// `U2F_REGISTER`: `challenge_hash` and `app_id_hash` are both 32-byte
/// SHA-256 digests supplied by the caller (the browser origin/challenge),
/// per the U2F raw message format.
pub fn register(
    hid: &HidTransport,
    channel: &CtapHidChannel,
    challenge_hash: &[u8; 32],
    app_id_hash: &[u8; 32],
) -> Result<RegisterResponse, U2fError> {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(challenge_hash);
    data.extend_from_slice(app_id_hash);
    let apdu = ApduCommand::new(CLA, INS_REGISTER, 0x00, 0x00, data);

    let answer = exchange_with_presence_retry(hid, channel, &apdu)?;
    parse_register_response(answer.data())
}

fn parse_register_response(data: &[u8]) -> Result<RegisterResponse, U2fError> {
    // Reserved byte (0x05) + 65-byte uncompressed EC point + 1-byte key
    // handle length + key handle + X.509 attestation cert + signature.
    if data.is_empty() || data[0] != 0x05 || data.len() < 1 + 65 + 1 {
        return Err(U2fError::DeviceError { sw1: 0, sw2: 0 });
    }
    let public_key = data[1..66].to_vec();
    let kh_len = data[66] as usize;
    let kh_start = 67;
    if data.len() < kh_start + kh_len {
        return Err(U2fError::DeviceError { sw1: 0, sw2: 0 });
    }
    let key_handle = data[kh_start..kh_start + kh_len].to_vec();
    let rest = &data[kh_start + kh_len..];
    // The attestation certificate is a DER SEQUENCE; its declared length
    // tells us where the signature begins.
    let cert_len = der_sequence_len(rest).unwrap_or(rest.len());
    let attestation_certificate = rest[..cert_len.min(rest.len())].to_vec();
    let signature = rest[cert_len.min(rest.len())..].to_vec();

    Ok(RegisterResponse {
        public_key,
        key_handle,
        attestation_certificate,
        signature,
    })
}

fn der_sequence_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 || buf[0] != 0x30 {
        return None;
    }
    let (len, header_len) = if buf[1] & 0x80 == 0 {
        (buf[1] as usize, 2)
    } else {
        let n = (buf[1] & 0x7F) as usize;
        if n == 0 || n > 4 || buf.len() < 2 + n {
            return None;
        }
        let mut len = 0usize;
        for i in 0..n {
            len = (len << 8) | buf[2 + i] as usize;
        }
        (len, 2 + n)
    };
    Some(header_len + len)
}

#[derive(Clone, Debug)]
pub struct AuthenticateResponse {
    pub user_presence: u8,
    pub counter: u32,
    pub signature: Vec<u8>,
}

/// `U2F_AUTHENTICATE`.
pub fn authenticate(
    hid: &HidTransport,
    channel: &CtapHidChannel,
    challenge_hash: &[u8; 32],
    app_id_hash: &[u8; 32],
    key_handle: &[u8],
    control: u8,
) -> Result<AuthenticateResponse, U2fError> {
    let mut data = Vec::with_capacity(65 + key_handle.len());
    data.extend_from_slice(challenge_hash);
    data.extend_from_slice(app_id_hash);
    data.push(key_handle.len() as u8);
    data.extend_from_slice(key_handle);
    let apdu = ApduCommand::new(CLA, INS_AUTHENTICATE, control, 0x00, data);

    let answer = if control == ctrl::CHECK_ONLY {
        // Check-only never waits for presence: a 6985 there just means
        // "valid handle, no touch yet", which callers may want to see.
        exchange(hid, channel, &apdu)?
    } else {
        exchange_with_presence_retry(hid, channel, &apdu)?
    };

    if !answer.is_success() {
        return Err(U2fError::DeviceError {
            sw1: answer.sw1,
            sw2: answer.sw2,
        });
    }

    let d = answer.data();
    if d.len() < 5 {
        return Err(U2fError::DeviceError { sw1: 0, sw2: 0 });
    }
    let user_presence = d[0];
    let counter = u32::from_be_bytes([d[1], d[2], d[3], d[4]]);
    let signature = d[5..].to_vec();

    Ok(AuthenticateResponse {
        user_presence,
        counter,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn der_sequence_len_short_form() {
        let buf = [0x30, 0x05, 1, 2, 3, 4, 5, 0xFF];
        assert_eq!(der_sequence_len(&buf), Some(7));
    }

    #[test]
    fn der_sequence_len_long_form() {
        let mut buf = vec![0x30, 0x82, 0x01, 0x00];
        buf.extend(vec![0u8; 0x100]);
        assert_eq!(der_sequence_len(&buf), Some(4 + 0x100));
    }
}
