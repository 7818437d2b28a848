//! PIV engine (spec.md §4.8): SELECT, PIN/PUK verification and
//! management, slot enumeration via `GET DATA`, and asymmetric key
//! generation, each call building its own [`ApduLog`](crate::ApduLog) of
//! every APDU exchanged.
//!
//! Certificate parsing stops at [`crate::der::summarize_certificate`] —
//! there is no X.509 signature or chain validation here, by design (see
//! `sk-protocol::der`).

use sk_apdu::{ApduAnswer, ApduCommand};
use sk_transport_ccid::CcidTransport;
use thiserror::Error;

use crate::types::piv_slots;
use crate::{ApduLog, ApduLogEntry, PivSlotRecord};

const CLA: u8 = 0x00;
const INS_SELECT: u8 = 0xA4;
const INS_GET_DATA: u8 = 0xCB;
const INS_VERIFY: u8 = 0x20;
const INS_CHANGE_REFERENCE_DATA: u8 = 0x24;
const INS_RESET_RETRY_COUNTER: u8 = 0x2C;
const INS_GENERATE_ASYMMETRIC_KEY_PAIR: u8 = 0x47;

const PIN_REFERENCE: u8 = 0x80;
const PUK_REFERENCE: u8 = 0x81;

/// RID A000000308 00 00 10 00 01 00 — the PIV application identifier.
const PIV_AID: [u8; 9] = [0xA0, 0x00, 0x00, 0x03, 0x08, 0x00, 0x00, 0x10, 0x00];

#[derive(Error, Debug)]
pub enum PivError {
    #[error(transparent)]
    Transport(#[from] sk_transport_ccid::CcidTransportError),
    #[error("PIV applet not found on this card")]
    AppletNotSelected,
    #[error("PIN incorrect, {retries} attempt(s) remaining")]
    PinIncorrect { retries: u8 },
    #[error("PIN is blocked")]
    PinBlocked,
    #[error("card returned status {sw1:02X}{sw2:02X}")]
    CardError { sw1: u8, sw2: u8 },
    #[error(transparent)]
    Der(#[from] crate::der::DerError),
}

fn exchange(
    card: &mut CcidTransport,
    log: &mut ApduLog,
    label: &str,
    apdu: &ApduCommand,
) -> Result<ApduAnswer, PivError> {
    let command_bytes = apdu.serialize_extended();
    let answer = sk_transport_ccid::exchange(card, apdu)?;
    log.push(ApduLogEntry::record(label, &command_bytes, &answer));
    Ok(answer)
}

fn require_success(answer: &ApduAnswer) -> Result<(), PivError> {
    if answer.is_success() {
        return Ok(());
    }
    if let Some(retries) = answer.retries_remaining() {
        return Err(PivError::PinIncorrect { retries });
    }
    if answer.sw() == 0x6983 {
        return Err(PivError::PinBlocked);
    }
    Err(PivError::CardError {
        sw1: answer.sw1,
        sw2: answer.sw2,
    })
}

/// `SELECT` the PIV AID. Every other function in this module assumes the
/// applet is already selected on the handle it is given.
pub fn select(card: &mut CcidTransport, log: &mut ApduLog) -> Result<(), PivError> {
    let apdu = ApduCommand::new(CLA, INS_SELECT, 0x04, 0x00, PIV_AID.to_vec());
    let answer = exchange(card, log, "SELECT PIV", &apdu)?;
    if !answer.is_success() {
        return Err(PivError::AppletNotSelected);
    }
    Ok(())
}

/// `VERIFY` the PIV application PIN. `None` attempts a status check
/// (empty `Lc`) without consuming a retry.
pub fn verify_pin(card: &mut CcidTransport, log: &mut ApduLog, pin: Option<&str>) -> Result<(), PivError> {
    let data = pin.map(pad_pin_block).unwrap_or_default();
    let apdu = ApduCommand::new(CLA, INS_VERIFY, 0x00, PIN_REFERENCE, data);
    let answer = exchange(card, log, "VERIFY PIN", &apdu)?;
    require_success(&answer)
}

pub fn change_pin(card: &mut CcidTransport, log: &mut ApduLog, old_pin: &str, new_pin: &str) -> Result<(), PivError> {
    let mut data = pad_pin_block(old_pin).to_vec();
    data.extend_from_slice(&pad_pin_block(new_pin));
    let apdu = ApduCommand::new(CLA, INS_CHANGE_REFERENCE_DATA, 0x00, PIN_REFERENCE, data);
    let answer = exchange(card, log, "CHANGE PIN", &apdu)?;
    require_success(&answer)
}

pub fn change_puk(card: &mut CcidTransport, log: &mut ApduLog, old_puk: &str, new_puk: &str) -> Result<(), PivError> {
    let mut data = pad_pin_block(old_puk).to_vec();
    data.extend_from_slice(&pad_pin_block(new_puk));
    let apdu = ApduCommand::new(CLA, INS_CHANGE_REFERENCE_DATA, 0x00, PUK_REFERENCE, data);
    let answer = exchange(card, log, "CHANGE PUK", &apdu)?;
    require_success(&answer)
}

/// `RESET RETRY COUNTER`: unblocks and resets the PIN using the PUK.
pub fn reset_pin_with_puk(
    card: &mut CcidTransport,
    log: &mut ApduLog,
    puk: &str,
    new_pin: &str,
) -> Result<(), PivError> {
    let mut data = pad_pin_block(puk).to_vec();
    data.extend_from_slice(&pad_pin_block(new_pin));
    let apdu = ApduCommand::new(CLA, INS_RESET_RETRY_COUNTER, 0x00, PIN_REFERENCE, data);
    let answer = exchange(card, log, "RESET RETRY COUNTER", &apdu)?;
    require_success(&answer)
}

fn pad_pin_block(pin: &str) -> [u8; 8] {
    let mut buf = [0xFFu8; 8];
    let bytes = pin.as_bytes();
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

fn get_data(card: &mut CcidTransport, log: &mut ApduLog, object_tag: &[u8]) -> Result<Vec<u8>, PivError> {
    let mut tlv_tag = vec![0x5C, object_tag.len() as u8];
    tlv_tag.extend_from_slice(object_tag);
    let apdu = ApduCommand::new(CLA, INS_GET_DATA, 0x3F, 0xFF, tlv_tag);
    let answer = exchange(card, log, "GET DATA", &apdu)?;
    if !answer.is_success() {
        return Err(PivError::CardError {
            sw1: answer.sw1,
            sw2: answer.sw2,
        });
    }
    Ok(answer.data().to_vec())
}

/// Extract the bare DER certificate from a PIV certificate data object:
/// `53 Lc ( 70 Lc <cert DER> 71 01 <flags> ... )`.
fn extract_certificate_der(object: &[u8]) -> Option<&[u8]> {
    let mut pos = skip_tlv_header(object, 0x53)?;
    loop {
        if pos >= object.len() {
            return None;
        }
        let tag = object[pos];
        let (len, header) = read_tlv_len(object, pos + 1)?;
        let value_start = pos + 1 + header;
        if value_start + len > object.len() {
            return None;
        }
        if tag == 0x70 {
            return Some(&object[value_start..value_start + len]);
        }
        pos = value_start + len;
    }
}

fn skip_tlv_header(buf: &[u8], expect_tag: u8) -> Option<usize> {
    if buf.first() != Some(&expect_tag) {
        return None;
    }
    let (_, header) = read_tlv_len(buf, 1)?;
    Some(1 + header)
}

fn read_tlv_len(buf: &[u8], pos: usize) -> Option<(usize, usize)> {
    let first = *buf.get(pos)?;
    if first & 0x80 == 0 {
        return Some((first as usize, 1));
    }
    let n = (first & 0x7F) as usize;
    if n == 0 || n > 4 {
        return None;
    }
    let mut len = 0usize;
    for i in 0..n {
        len = (len << 8) | *buf.get(pos + 1 + i)? as usize;
    }
    Some((len, 1 + n))
}

/// Reads every well-known slot's certificate object (if present) and
/// returns one [`PivSlotRecord`] per slot, `present: false` for slots with
/// no certificate stored.
pub fn enumerate_slots(card: &mut CcidTransport, log: &mut ApduLog) -> Vec<PivSlotRecord> {
    piv_slots::all_slots()
        .into_iter()
        .map(|slot| read_slot(card, log, slot))
        .collect()
}

fn read_slot(card: &mut CcidTransport, log: &mut ApduLog, slot: u8) -> PivSlotRecord {
    let tag = piv_slots::cert_object_tag(slot);
    match get_data(card, log, &tag) {
        Ok(object) => match extract_certificate_der(&object).and_then(|der| crate::der::summarize_certificate(der).ok()) {
            Some(summary) => PivSlotRecord {
                slot_id: slot,
                label: piv_slots::label(slot).to_string(),
                present: true,
                subject: Some(summary.subject),
                issuer: Some(summary.issuer),
                serial: Some(summary.serial_hex),
                not_before: Some(summary.not_before),
                not_after: Some(summary.not_after),
            },
            None => PivSlotRecord {
                slot_id: slot,
                label: piv_slots::label(slot).to_string(),
                present: false,
                subject: None,
                issuer: None,
                serial: None,
                not_before: None,
                not_after: None,
            },
        },
        Err(_) => PivSlotRecord {
            slot_id: slot,
            label: piv_slots::label(slot).to_string(),
            present: false,
            subject: None,
            issuer: None,
            serial: None,
            not_before: None,
            not_after: None,
        },
    }
}

/// RSA-2048, P-256 and P-384 algorithm ids accepted by `GENERATE
/// ASYMMETRIC KEY PAIR`'s `0x80` parameter tag.
pub mod algorithm {
    pub const RSA_2048: u8 = 0x07;
    pub const ECC_P256: u8 = 0x11;
    pub const ECC_P384: u8 = 0x14;
}

/// PIN policy tag `0xAA` values for `GENERATE ASYMMETRIC KEY PAIR`'s
/// control reference template.
pub mod pin_policy {
    pub const DEFAULT: u8 = 0x00;
    pub const NEVER: u8 = 0x01;
    pub const ONCE: u8 = 0x02;
    pub const ALWAYS: u8 = 0x03;
}

/// Touch policy tag `0xAB` values, same CRT.
pub mod touch_policy {
    pub const DEFAULT: u8 = 0x00;
    pub const NEVER: u8 = 0x01;
    pub const ALWAYS: u8 = 0x02;
    pub const CACHED: u8 = 0x03;
}

/// `GENERATE ASYMMETRIC KEY PAIR`: returns the raw public key TLV the
/// card reports (callers decode the point/modulus themselves; this
/// module's job stops at the APDU boundary). `pin_policy`/`touch_policy`
/// are optional BER-TLV tags (`0xAA`/`0xAB`) folded into the same `0xAC`
/// control reference template as the algorithm id; omitted when the
/// caller leaves the card's own default policy in place.
pub fn generate_key_pair(
    card: &mut CcidTransport,
    log: &mut ApduLog,
    slot: u8,
    algorithm_id: u8,
    pin_policy: Option<u8>,
    touch_policy: Option<u8>,
) -> Result<Vec<u8>, PivError> {
    let mut crt = vec![0x80, 0x01, algorithm_id];
    if let Some(policy) = pin_policy {
        crt.extend_from_slice(&[0xAA, 0x01, policy]);
    }
    if let Some(policy) = touch_policy {
        crt.extend_from_slice(&[0xAB, 0x01, policy]);
    }
    let mut data = vec![0xAC, crt.len() as u8];
    data.extend_from_slice(&crt);
    let apdu = ApduCommand::new(CLA, INS_GENERATE_ASYMMETRIC_KEY_PAIR, 0x00, slot, data);
    let answer = exchange(card, log, "GENERATE ASYMMETRIC KEY PAIR", &apdu)?;
    require_success(&answer)?;
    Ok(answer.into_data())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_short_pin_with_ff() {
        let padded = pad_pin_block("1234");
        assert_eq!(padded, [b'1', b'2', b'3', b'4', 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn extracts_bare_certificate_der() {
        let cert_der = [0x30, 0x03, 0x01, 0x02, 0x03];
        let mut object = vec![0x53, 0x00];
        let mut inner = vec![0x70, cert_der.len() as u8];
        inner.extend_from_slice(&cert_der);
        inner.extend_from_slice(&[0x71, 0x01, 0x00]);
        object[1] = inner.len() as u8;
        object.extend_from_slice(&inner);

        assert_eq!(extract_certificate_der(&object), Some(&cert_der[..]));
    }
}
