//! OpenPGP card engine (spec.md §4.9): SELECT, cardholder/URL data
//! objects, PW1/PW3 verification and change, `PUT DATA`, asymmetric key
//! generation, and `READ BINARY` export — following the same
//! select-then-exchange shape as [`crate::piv`].

use sk_apdu::{ApduAnswer, ApduCommand};
use sk_transport_ccid::CcidTransport;
use thiserror::Error;

use crate::{ApduLog, ApduLogEntry};

const CLA: u8 = 0x00;
const INS_SELECT: u8 = 0xA4;
const INS_GET_DATA: u8 = 0xCA;
const INS_PUT_DATA: u8 = 0xDA;
const INS_VERIFY: u8 = 0x20;
const INS_CHANGE_REFERENCE_DATA: u8 = 0x24;
const INS_GENERATE_ASYMMETRIC_KEY_PAIR: u8 = 0x47;
const INS_READ_BINARY: u8 = 0xB0;
/// Odd-instruction `PUT DATA`, addressed by tag `3FFF` rather than a
/// two-byte `P1P2` tag — carries the extended header list a key import
/// needs (`4D` wrapping a CRT plus private key template).
const INS_PUT_DATA_ODD: u8 = 0xDB;

/// RID D2760001240102 00 00 00 00 — the OpenPGP application AID prefix;
/// the trailing four bytes vary by card version/manufacturer and are
/// matched with a wildcard SELECT (no data appended past the RID).
const OPENPGP_RID: [u8; 6] = [0xD2, 0x76, 0x00, 0x01, 0x24, 0x01];

/// PW1 reference for everyday signing/decryption operations (as opposed
/// to `0x82`, PW1 valid for a single sign operation only).
const PW1_REFERENCE: u8 = 0x81;
const PW3_REFERENCE: u8 = 0x83;

pub mod data_object {
    pub const CARDHOLDER_NAME: [u8; 2] = [0x00, 0x5B];
    pub const URL: [u8; 2] = [0x5F, 0x50];
    pub const APPLICATION_RELATED_DATA: [u8; 2] = [0x00, 0x6E];
}

#[derive(Error, Debug)]
pub enum OpenPgpError {
    #[error(transparent)]
    Transport(#[from] sk_transport_ccid::CcidTransportError),
    #[error("OpenPGP applet not found on this card")]
    AppletNotSelected,
    #[error("PIN incorrect, {retries} attempt(s) remaining")]
    PinIncorrect { retries: u8 },
    #[error("PIN is blocked")]
    PinBlocked,
    #[error("card returned status {sw1:02X}{sw2:02X}")]
    CardError { sw1: u8, sw2: u8 },
}

fn exchange(
    card: &mut CcidTransport,
    log: &mut ApduLog,
    label: &str,
    apdu: &ApduCommand,
) -> Result<ApduAnswer, OpenPgpError> {
    let command_bytes = apdu.serialize_extended();
    let answer = sk_transport_ccid::exchange(card, apdu)?;
    log.push(ApduLogEntry::record(label, &command_bytes, &answer));
    Ok(answer)
}

fn require_success(answer: &ApduAnswer) -> Result<(), OpenPgpError> {
    if answer.is_success() {
        return Ok(());
    }
    if let Some(retries) = answer.retries_remaining() {
        return Err(OpenPgpError::PinIncorrect { retries });
    }
    if answer.sw() == 0x6983 {
        return Err(OpenPgpError::PinBlocked);
    }
    Err(OpenPgpError::CardError {
        sw1: answer.sw1,
        sw2: answer.sw2,
    })
}

pub fn select(card: &mut CcidTransport, log: &mut ApduLog) -> Result<(), OpenPgpError> {
    let apdu = ApduCommand::new(CLA, INS_SELECT, 0x04, 0x00, OPENPGP_RID.to_vec());
    let answer = exchange(card, log, "SELECT OpenPGP", &apdu)?;
    if !answer.is_success() {
        return Err(OpenPgpError::AppletNotSelected);
    }
    Ok(())
}

fn get_data(card: &mut CcidTransport, log: &mut ApduLog, tag: [u8; 2]) -> Result<Vec<u8>, OpenPgpError> {
    let apdu = ApduCommand::new(CLA, INS_GET_DATA, tag[0], tag[1], Vec::new());
    let answer = exchange(card, log, "GET DATA", &apdu)?;
    if !answer.is_success() {
        return Err(OpenPgpError::CardError {
            sw1: answer.sw1,
            sw2: answer.sw2,
        });
    }
    Ok(answer.into_data())
}

/// Cardholder name as stored in DO `0x005B` (UTF-8, `<<` separating
/// surname/given name per ISO/IEC 7501-1 — left for the caller to split).
pub fn read_cardholder_name(card: &mut CcidTransport, log: &mut ApduLog) -> Result<String, OpenPgpError> {
    let raw = get_data(card, log, data_object::CARDHOLDER_NAME)?;
    Ok(String::from_utf8_lossy(&raw).to_string())
}

pub fn read_url(card: &mut CcidTransport, log: &mut ApduLog) -> Result<String, OpenPgpError> {
    let raw = get_data(card, log, data_object::URL)?;
    Ok(String::from_utf8_lossy(&raw).to_string())
}

pub fn verify_pw1(card: &mut CcidTransport, log: &mut ApduLog, pin: &str) -> Result<(), OpenPgpError> {
    let apdu = ApduCommand::new(CLA, INS_VERIFY, 0x00, PW1_REFERENCE, pin.as_bytes().to_vec());
    let answer = exchange(card, log, "VERIFY PW1", &apdu)?;
    require_success(&answer)
}

pub fn verify_pw3(card: &mut CcidTransport, log: &mut ApduLog, pin: &str) -> Result<(), OpenPgpError> {
    let apdu = ApduCommand::new(CLA, INS_VERIFY, 0x00, PW3_REFERENCE, pin.as_bytes().to_vec());
    let answer = exchange(card, log, "VERIFY PW3", &apdu)?;
    require_success(&answer)
}

pub fn change_pw1(card: &mut CcidTransport, log: &mut ApduLog, old_pin: &str, new_pin: &str) -> Result<(), OpenPgpError> {
    let mut data = old_pin.as_bytes().to_vec();
    data.extend_from_slice(new_pin.as_bytes());
    let apdu = ApduCommand::new(CLA, INS_CHANGE_REFERENCE_DATA, 0x00, PW1_REFERENCE, data);
    let answer = exchange(card, log, "CHANGE PW1", &apdu)?;
    require_success(&answer)
}

pub fn change_pw3(card: &mut CcidTransport, log: &mut ApduLog, old_pin: &str, new_pin: &str) -> Result<(), OpenPgpError> {
    let mut data = old_pin.as_bytes().to_vec();
    data.extend_from_slice(new_pin.as_bytes());
    let apdu = ApduCommand::new(CLA, INS_CHANGE_REFERENCE_DATA, 0x00, PW3_REFERENCE, data);
    let answer = exchange(card, log, "CHANGE PW3", &apdu)?;
    require_success(&answer)
}

/// `PUT DATA` for any writable data object (requires a prior PW3 verify
/// for most tags, enforced by the card itself).
pub fn put_data(card: &mut CcidTransport, log: &mut ApduLog, tag: [u8; 2], value: &[u8]) -> Result<(), OpenPgpError> {
    let apdu = ApduCommand::new(CLA, INS_PUT_DATA, tag[0], tag[1], value.to_vec());
    let answer = exchange(card, log, "PUT DATA", &apdu)?;
    require_success(&answer)
}

pub mod key_slot {
    /// Control reference template tags for `GENERATE ASYMMETRIC KEY PAIR`.
    pub const SIGNATURE: [u8; 2] = [0xB6, 0x00];
    pub const DECRYPTION: [u8; 2] = [0xB8, 0x00];
    pub const AUTHENTICATION: [u8; 2] = [0xA4, 0x00];
}

/// `GENERATE ASYMMETRIC KEY PAIR` (`P1=0x80` generate, as opposed to
/// `P1=0x81` read-existing-public-key). Returns the raw public key TLV.
pub fn generate_key_pair(card: &mut CcidTransport, log: &mut ApduLog, slot: [u8; 2]) -> Result<Vec<u8>, OpenPgpError> {
    let apdu = ApduCommand::new(CLA, INS_GENERATE_ASYMMETRIC_KEY_PAIR, 0x80, 0x00, slot.to_vec());
    let answer = exchange(card, log, "GENERATE ASYMMETRIC KEY PAIR", &apdu)?;
    require_success(&answer)?;
    Ok(answer.into_data())
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

/// Loads caller-supplied key material into `slot` via the odd-instruction
/// `PUT DATA` (tag `3FFF`), distinct from [`generate_key_pair`] which has
/// the card generate the key pair itself. `key_data` is the raw private
/// key material in whatever encoding the slot's algorithm expects (e.g.
/// the concatenated RSA CRT components, or a raw scalar for ECC); this
/// engine does not interpret it, only wraps it in the extended header
/// list OpenPGP card spec §4.4.3.12 requires: a control reference
/// template naming the slot, wrapping a cardholder private key template
/// (`7F48`) and the key data itself (`5F48`).
pub fn import_key(card: &mut CcidTransport, log: &mut ApduLog, slot: [u8; 2], key_data: &[u8]) -> Result<(), OpenPgpError> {
    let mut key_data_do = vec![0x5F, 0x48];
    push_der_len(&mut key_data_do, key_data.len());
    key_data_do.extend_from_slice(key_data);

    let private_key_template = vec![0x7F, 0x48, 0x00];

    let mut body = Vec::new();
    body.extend_from_slice(&slot);
    body.extend_from_slice(&private_key_template);
    body.extend_from_slice(&key_data_do);

    let mut data = vec![0x4D];
    push_der_len(&mut data, body.len());
    data.extend_from_slice(&body);

    let apdu = ApduCommand::new(CLA, INS_PUT_DATA_ODD, 0x3F, 0xFF, data);
    let answer = exchange(card, log, "PUT DATA (key import)", &apdu)?;
    require_success(&answer)
}

/// `READ BINARY` with no preceding `SELECT FILE` — used to stream out a
/// previously-selected data object (e.g. an exported certificate) in
/// `Le`-sized chunks, offset-addressed via `P1P2`.
pub fn read_binary(card: &mut CcidTransport, log: &mut ApduLog, offset: u16) -> Result<Vec<u8>, OpenPgpError> {
    let p1 = (offset >> 8) as u8;
    let p2 = (offset & 0xFF) as u8;
    let apdu = ApduCommand::new(CLA, INS_READ_BINARY, p1, p2, Vec::new());
    let answer = exchange(card, log, "READ BINARY", &apdu)?;
    if !answer.is_success() && answer.more_data().is_none() {
        return Err(OpenPgpError::CardError {
            sw1: answer.sw1,
            sw2: answer.sw2,
        });
    }
    Ok(answer.into_data())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_apdu_carries_rid_only() {
        let apdu = ApduCommand::new(CLA, INS_SELECT, 0x04, 0x00, OPENPGP_RID.to_vec());
        let serialized = apdu.serialize();
        assert_eq!(&serialized[5..11], &OPENPGP_RID);
    }
}
