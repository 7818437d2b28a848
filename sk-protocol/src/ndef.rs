//! NDEF type-4 tag engine (spec.md §4.11): SELECT the NDEF application
//! and CC file, `READ BINARY`/`UPDATE BINARY` against the NDEF file, and
//! length-prefixed message parsing, with chunked writes for payloads
//! larger than the card's extended-length limit.

use sk_apdu::{ApduAnswer, ApduCommand};
use sk_transport_ccid::CcidTransport;
use thiserror::Error;

use crate::{ApduLog, ApduLogEntry};

const CLA: u8 = 0x00;
const INS_SELECT: u8 = 0xA4;
const INS_READ_BINARY: u8 = 0xB0;
const INS_UPDATE_BINARY: u8 = 0xD6;

/// NDEF Tag Application AID (NFC Forum Type 4 Tag, NDEF Exchange Format).
const NDEF_AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];
const CC_FILE_ID: [u8; 2] = [0xE1, 0x03];
const NDEF_FILE_ID: [u8; 2] = [0xE1, 0x04];

/// Maximum chunk written per `UPDATE BINARY`, chosen conservatively under
/// the short-form APDU 255-byte data limit.
const WRITE_CHUNK_SIZE: usize = 240;

#[derive(Error, Debug)]
pub enum NdefError {
    #[error(transparent)]
    Transport(#[from] sk_transport_ccid::CcidTransportError),
    #[error("NDEF application not found on this card")]
    AppletNotSelected,
    #[error("capability container is malformed")]
    MalformedCapabilityContainer,
    #[error("card returned status {sw1:02X}{sw2:02X}")]
    CardError { sw1: u8, sw2: u8 },
    #[error("message of {0} bytes exceeds the tag's {1}-byte NDEF file capacity")]
    MessageTooLarge(usize, usize),
}

fn exchange(
    card: &mut CcidTransport,
    log: &mut ApduLog,
    label: &str,
    apdu: &ApduCommand,
) -> Result<ApduAnswer, NdefError> {
    let command_bytes = apdu.serialize();
    let answer = sk_transport_ccid::exchange(card, apdu)?;
    log.push(ApduLogEntry::record(label, &command_bytes, &answer));
    Ok(answer)
}

fn select_by_name(card: &mut CcidTransport, log: &mut ApduLog, label: &str, aid: &[u8]) -> Result<(), NdefError> {
    let apdu = ApduCommand::new(CLA, INS_SELECT, 0x04, 0x00, aid.to_vec());
    let answer = exchange(card, log, label, &apdu)?;
    if !answer.is_success() {
        return Err(NdefError::AppletNotSelected);
    }
    Ok(())
}

fn select_by_id(card: &mut CcidTransport, log: &mut ApduLog, label: &str, file_id: [u8; 2]) -> Result<(), NdefError> {
    let apdu = ApduCommand::new(CLA, INS_SELECT, 0x00, 0x0C, file_id.to_vec());
    let answer = exchange(card, log, label, &apdu)?;
    if !answer.is_success() {
        return Err(NdefError::AppletNotSelected);
    }
    Ok(())
}

fn read_binary(card: &mut CcidTransport, log: &mut ApduLog, offset: u16, len: u8) -> Result<Vec<u8>, NdefError> {
    let apdu = ApduCommand::new(CLA, INS_READ_BINARY, (offset >> 8) as u8, (offset & 0xFF) as u8, Vec::new())
        .with_le(len);
    let answer = exchange(card, log, "READ BINARY", &apdu)?;
    if !answer.is_success() {
        return Err(NdefError::CardError {
            sw1: answer.sw1,
            sw2: answer.sw2,
        });
    }
    Ok(answer.into_data())
}

fn update_binary(card: &mut CcidTransport, log: &mut ApduLog, offset: u16, data: &[u8]) -> Result<(), NdefError> {
    let apdu = ApduCommand::new(CLA, INS_UPDATE_BINARY, (offset >> 8) as u8, (offset & 0xFF) as u8, data.to_vec());
    let answer = exchange(card, log, "UPDATE BINARY", &apdu)?;
    if !answer.is_success() {
        return Err(NdefError::CardError {
            sw1: answer.sw1,
            sw2: answer.sw2,
        });
    }
    Ok(())
}

/// Parsed capability container: the NDEF file's maximum size and its
/// read/write access conditions.
#[derive(Clone, Debug)]
pub struct CapabilityContainer {
    pub ndef_file_max_size: u16,
    pub read_access_free: bool,
    pub write_access_free: bool,
}

/// Selects the NDEF application, reads the CC file (tag E103), and
/// parses it. Every subsequent call in this module assumes this has
/// already run on the handle it is given.
pub fn select_and_read_capabilities(card: &mut CcidTransport, log: &mut ApduLog) -> Result<CapabilityContainer, NdefError> {
    select_by_name(card, log, "SELECT NDEF application", &NDEF_AID)?;
    select_by_id(card, log, "SELECT CC file", CC_FILE_ID)?;
    let header = read_binary(card, log, 0, 15)?;
    parse_capability_container(&header)
}

fn parse_capability_container(cc: &[u8]) -> Result<CapabilityContainer, NdefError> {
    // CCLEN(2) + mapping version(1) + MLe(2) + MLc(2) + NDEF File Control
    // TLV: tag(1)=0x04, len(1)=0x06, file id(2), max size(2), read/write
    // access bytes(2).
    if cc.len() < 15 || cc[7] != 0x04 {
        return Err(NdefError::MalformedCapabilityContainer);
    }
    let max_size = u16::from_be_bytes([cc[9], cc[10]]);
    let read_access = cc[13];
    let write_access = cc[14];
    Ok(CapabilityContainer {
        ndef_file_max_size: max_size,
        read_access_free: read_access == 0x00,
        write_access_free: write_access == 0x00,
    })
}

/// Reads the NDEF message out of the currently-selected NDEF file: a
/// 2-byte big-endian length prefix followed by the message bytes.
pub fn read_message(card: &mut CcidTransport, log: &mut ApduLog) -> Result<Vec<u8>, NdefError> {
    select_by_id(card, log, "SELECT NDEF file", NDEF_FILE_ID)?;
    let len_bytes = read_binary(card, log, 0, 2)?;
    if len_bytes.len() < 2 {
        return Err(NdefError::MalformedCapabilityContainer);
    }
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;

    let mut message = Vec::with_capacity(len);
    let mut offset = 2u16;
    while message.len() < len {
        let remaining = len - message.len();
        let chunk_len = remaining.min(0xFF) as u8;
        let chunk = read_binary(card, log, offset, chunk_len)?;
        if chunk.is_empty() {
            break;
        }
        offset += chunk.len() as u16;
        message.extend_from_slice(&chunk);
    }
    message.truncate(len);
    Ok(message)
}

/// Writes an NDEF message: zeroes the length prefix, streams the
/// payload in [`WRITE_CHUNK_SIZE`] chunks, then writes the real length
/// last — so a reader never observes a non-zero length paired with a
/// partially-written message.
pub fn write_message(
    card: &mut CcidTransport,
    log: &mut ApduLog,
    capabilities: &CapabilityContainer,
    message: &[u8],
) -> Result<(), NdefError> {
    if message.len() + 2 > capabilities.ndef_file_max_size as usize {
        return Err(NdefError::MessageTooLarge(message.len(), capabilities.ndef_file_max_size as usize - 2));
    }
    select_by_id(card, log, "SELECT NDEF file", NDEF_FILE_ID)?;
    update_binary(card, log, 0, &[0x00, 0x00])?;

    let mut offset = 2u16;
    for chunk in message.chunks(WRITE_CHUNK_SIZE) {
        update_binary(card, log, offset, chunk)?;
        offset += chunk.len() as u16;
    }

    let len = (message.len() as u16).to_be_bytes();
    update_binary(card, log, 0, &len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capability_container() {
        let cc = [0x00, 0x0F, 0x20, 0x00, 0x3B, 0x00, 0x34, 0x04, 0x06, 0xE1, 0x04, 0x00, 0xFE, 0x00, 0x00];
        let parsed = parse_capability_container(&cc).unwrap();
        assert_eq!(parsed.ndef_file_max_size, 0x00FE);
        assert!(parsed.read_access_free);
        assert!(parsed.write_access_free);
    }

    #[test]
    fn rejects_malformed_container() {
        assert!(parse_capability_container(&[0u8; 4]).is_err());
    }
}
