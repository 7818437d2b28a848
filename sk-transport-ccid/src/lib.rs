//! PC/SC smart-card transport (spec.md §4.4).
//!
//! `CcidTransport::transmit_raw` is the byte-transparent single-exchange
//! primitive exposed as the agent's `transmitApdu` command; [`exchange`]
//! layers `61XX`/`6CXX` chaining on top for the protocol engines (PIV,
//! OpenPGP, NDEF), which never see a chained status word themselves.

use std::ffi::CString;

use log::{debug, trace};
use sk_apdu::{ApduAnswer, ApduCommand};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CcidTransportError {
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),
    #[error("malformed response APDU: {0}")]
    Answer(#[from] sk_apdu::ApduAnswerError),
    #[error("reader {0:?} not found")]
    ReaderNotFound(String),
}

/// One enumerated PC/SC reader slot. A reader with no card present is still
/// listed; opening it is where absence becomes observable (spec.md §4.2
/// treats "no card in the reader" like any other open failure).
#[derive(Clone, Debug)]
pub struct CcidDeviceInfo {
    pub reader_name: String,
}

/// Substrings PC/SC reader names for Feitian CCID readers carry. PC/SC
/// exposes no per-reader USB vendor id the way `hidapi` does, so reader
/// identity has to be read out of the name the driver reports instead —
/// the same filtering goal as [`sk_transport_hid::enumerate`]'s vendor-id
/// match, by the only means this transport has.
const FEITIAN_READER_NAME_MARKERS: [&str; 2] = ["Feitian", "FEITIAN"];

pub fn enumerate(ctx: &pcsc::Context) -> Vec<CcidDeviceInfo> {
    let buf_len = match ctx.list_readers_len() {
        Ok(n) => n,
        Err(_) => return Vec::new(),
    };
    let mut buf = vec![0u8; buf_len];
    let readers = match ctx.list_readers(&mut buf) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    readers
        .filter_map(|r| r.to_str().ok())
        .filter(|name| FEITIAN_READER_NAME_MARKERS.iter().any(|marker| name.contains(marker)))
        .map(|name| CcidDeviceInfo {
            reader_name: name.to_string(),
        })
        .collect()
}

/// One connected card, in a named reader, with a negotiated active
/// protocol (T=0 or T=1). Exclusive for the lifetime of the handle; the
/// registry enforces single-open, not this type.
pub struct CcidTransport {
    card: pcsc::Card,
    reader_name: String,
}

impl CcidTransport {
    pub fn connect(ctx: &pcsc::Context, reader_name: &str) -> Result<Self, CcidTransportError> {
        let name = CString::new(reader_name).map_err(|_| {
            CcidTransportError::ReaderNotFound(reader_name.to_string())
        })?;
        let card = ctx.connect(&name, pcsc::ShareMode::Exclusive, pcsc::Protocols::ANY)?;
        Ok(Self {
            card,
            reader_name: reader_name.to_string(),
        })
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Transmit a single command APDU and return the full response
    /// including the trailing `SW1 SW2`, with no chaining applied. This is
    /// the raw operation the `transmitApdu` command exposes.
    pub fn transmit_raw(&self, apdu: &[u8]) -> Result<Vec<u8>, CcidTransportError> {
        trace!("[apdu >>] {}", hex::encode(apdu));
        let mut rx = vec![0u8; 4096];
        let response = self.card.transmit(apdu, &mut rx)?;
        trace!("[apdu <<] {}", hex::encode(response));
        Ok(response.to_vec())
    }

    /// Disconnect leaving the card in place (no reset, no eject) — the
    /// registry calls this on `closeDevice` and on process shutdown.
    pub fn disconnect(self) {
        let _ = self.card.disconnect(pcsc::Disposition::LeaveCard);
    }
}

/// Transmit `cmd`, transparently following `61XX` (issue `GET RESPONSE`)
/// and `6CXX` (retransmit with the corrected `Le`) chains. Returns once a
/// non-`61/6C` status word is reached (spec.md §4.4, testable property #6).
pub fn exchange(transport: &CcidTransport, cmd: &ApduCommand) -> Result<ApduAnswer, CcidTransportError> {
    let mut current = cmd.clone();
    let mut accumulated: Vec<u8> = Vec::new();

    loop {
        let raw = transport.transmit_raw(&current.serialize())?;
        let answer = ApduAnswer::from_bytes(raw)?;

        if let Some(remaining) = answer.wrong_le() {
            debug!("APDU chaining: 6C{:02X}, retransmitting with Le={:02X}", remaining, remaining);
            current = current.clone().with_le(remaining);
            continue;
        }

        accumulated.extend_from_slice(answer.data());

        if let Some(remaining) = answer.more_data() {
            debug!("APDU chaining: 61{:02X}, issuing GET RESPONSE", remaining);
            current = ApduCommand::new(cmd.cla, 0xC0, 0x00, 0x00, Vec::new()).with_le(remaining);
            continue;
        }

        let mut full = accumulated;
        full.push(answer.sw1);
        full.push(answer.sw2);
        return Ok(ApduAnswer::from_bytes(full)?);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sk_apdu::ApduCommand;

    #[test]
    fn select_command_serializes_as_expected() {
        let cmd = ApduCommand::new(0x00, 0xA4, 0x04, 0x00, vec![0xA0, 0x00, 0x00, 0x03, 0x08]);
        assert_eq!(
            cmd.serialize(),
            vec![0x00, 0xA4, 0x04, 0x00, 0x05, 0xA0, 0x00, 0x00, 0x03, 0x08]
        );
    }
}
