//! USB HID report transport and CTAPHID packet framing.
//!
//! `HidTransport::send_report`/`receive_report` are the byte-transparent
//! 64-byte report primitives (spec.md §4.3); [`ctaphid`] layers channel
//! allocation and message (re)assembly on top of them, grounded on the
//! teacher's `write_apdu`/`read_apdu` loop in `ledger-transport-hid` and on
//! the CTAPHID packet header layout used by `rukai-not-webusb-rs`.

use std::ffi::CStr;

use log::{debug, trace};
use thiserror::Error;

pub const REPORT_SIZE: usize = 64;
const DEFAULT_READ_TIMEOUT_MS: i32 = 5_000;

#[derive(Error, Debug)]
pub enum HidTransportError {
    #[error("HID device error: {0}")]
    Hid(#[from] hidapi::HidError),
    #[error("report payload exceeds {REPORT_SIZE} bytes")]
    ReportTooLarge,
    #[error("timed out waiting for a HID report")]
    Timeout,
}

/// Stable-enough identity for one enumerated HID interface; the registry
/// turns this into the process-lifetime `DeviceDescriptor`.
#[derive(Clone, Debug)]
pub struct HidDeviceInfo {
    pub path: std::ffi::CString,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub interface_number: i32,
    pub usage_page: u16,
}

/// Enumerate every HID interface matching `vendor_id`.
pub fn enumerate(api: &hidapi::HidApi, vendor_id: u16) -> Vec<HidDeviceInfo> {
    api.device_list()
        .filter(|d| d.vendor_id() == vendor_id)
        .map(|d| HidDeviceInfo {
            path: d.path().to_owned(),
            vendor_id: d.vendor_id(),
            product_id: d.product_id(),
            manufacturer: d.manufacturer_string().map(str::to_owned),
            product: d.product_string().map(str::to_owned),
            serial: d.serial_number().map(str::to_owned),
            interface_number: d.interface_number(),
            usage_page: d.usage_page(),
        })
        .collect()
}

/// A single opened HID interface. Exclusive for the lifetime of the handle,
/// per the registry's single-open invariant; this type itself does not
/// enforce that, the registry does.
pub struct HidTransport {
    device: hidapi::HidDevice,
}

impl HidTransport {
    pub fn open(api: &hidapi::HidApi, path: &CStr) -> Result<Self, HidTransportError> {
        let device = api.open_path(path)?;
        Ok(Self { device })
    }

    /// Zero-pad `data` to [`REPORT_SIZE`] bytes and write a single report.
    /// Rejects payloads over `REPORT_SIZE`.
    pub fn send_report(&self, data: &[u8]) -> Result<usize, HidTransportError> {
        if data.len() > REPORT_SIZE {
            return Err(HidTransportError::ReportTooLarge);
        }
        let mut buf = [0u8; REPORT_SIZE];
        buf[..data.len()].copy_from_slice(data);
        trace!("[hid >>] {}", hex::encode(buf));
        let written = self.device.write(&buf)?;
        Ok(written)
    }

    /// Read a single report, blocking up to `timeout_ms`.
    pub fn receive_report(&self, timeout_ms: i32) -> Result<Vec<u8>, HidTransportError> {
        let mut buf = [0u8; REPORT_SIZE];
        let n = self.device.read_timeout(&mut buf, timeout_ms)?;
        if n == 0 {
            return Err(HidTransportError::Timeout);
        }
        trace!("[hid <<] {}", hex::encode(&buf[..n]));
        Ok(buf[..n].to_vec())
    }

    pub fn default_timeout_ms() -> i32 {
        DEFAULT_READ_TIMEOUT_MS
    }
}

/// CTAPHID channel allocation, packet framing and message reassembly
/// (spec.md §4.3).
pub mod ctaphid {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    pub const BROADCAST_CID: u32 = 0xFFFF_FFFF;

    pub const CMD_PING: u8 = 0x81;
    pub const CMD_MSG: u8 = 0x83;
    pub const CMD_INIT: u8 = 0x86;
    pub const CMD_WINK: u8 = 0x88;
    pub const CMD_CBOR: u8 = 0x90;
    pub const CMD_CANCEL: u8 = 0x91;
    pub const CMD_KEEPALIVE: u8 = 0xBB;
    pub const CMD_ERROR: u8 = 0xBF;

    const INIT_PAYLOAD_MAX: usize = REPORT_SIZE - 7;
    const CONT_PAYLOAD_MAX: usize = REPORT_SIZE - 5;

    #[derive(Error, Debug)]
    pub enum CtapHidError {
        #[error(transparent)]
        Transport(#[from] HidTransportError),
        #[error("CTAPHID error frame, code {0:#04x}")]
        ErrorFrame(u8),
        #[error("unexpected channel id in response")]
        ChannelMismatch,
        #[error("out-of-order continuation packet, expected sequence {expected}, got {got}")]
        SequenceMismatch { expected: u8, got: u8 },
        #[error("short packet, missing CTAPHID header")]
        ShortPacket,
        #[error("message payload exceeds the negotiated max message size")]
        MessageTooLarge,
    }

    /// A channel allocated by `INIT`, bound to one open HID handle.
    #[derive(Clone, Copy, Debug)]
    pub struct CtapHidChannel {
        pub cid: u32,
        pub max_message_size: usize,
        pub capabilities: u8,
    }

    impl CtapHidChannel {
        /// Allocate a channel on the broadcast cid with a fresh 8-byte
        /// nonce. Re-`INIT` clears any stale reassembly state because the
        /// authenticator replies on a brand new channel id.
        pub fn init(hid: &HidTransport, nonce: [u8; 8]) -> Result<Self, CtapHidError> {
            Self::init_with_timeout(hid, nonce, HidTransport::default_timeout_ms())
        }

        /// As [`Self::init`], but with an explicit bound on the wait for the
        /// `INIT` response — used by the detection engine so one
        /// unresponsive applet cannot stall probing the others.
        pub fn init_with_timeout(hid: &HidTransport, nonce: [u8; 8], timeout_ms: i32) -> Result<Self, CtapHidError> {
            send_message(hid, BROADCAST_CID, CMD_INIT, &nonce)?;
            let (cmd, payload) = receive_message(hid, BROADCAST_CID, timeout_ms)?;
            if cmd != CMD_INIT || payload.len() < 17 {
                return Err(CtapHidError::ShortPacket);
            }
            if payload[..8] != nonce {
                return Err(CtapHidError::ChannelMismatch);
            }
            let cid = BigEndian::read_u32(&payload[8..12]);
            let capabilities = payload[16];
            debug!("CTAPHID INIT allocated channel {:#010x}", cid);
            Ok(Self {
                cid,
                // Conservative default; authenticators may report a larger
                // message size via authenticatorGetInfo, at which point the
                // caller can widen this.
                max_message_size: 7609,
                capabilities,
            })
        }

        pub fn send(&self, hid: &HidTransport, cmd: u8, payload: &[u8]) -> Result<(), CtapHidError> {
            if payload.len() > self.max_message_size {
                return Err(CtapHidError::MessageTooLarge);
            }
            send_message(hid, self.cid, cmd, payload)
        }

        pub fn receive(&self, hid: &HidTransport, timeout_ms: i32) -> Result<(u8, Vec<u8>), CtapHidError> {
            receive_message(hid, self.cid, timeout_ms)
        }
    }

    fn send_message(hid: &HidTransport, cid: u32, cmd: u8, payload: &[u8]) -> Result<(), CtapHidError> {
        let mut report = [0u8; REPORT_SIZE];
        BigEndian::write_u32(&mut report[0..4], cid);
        report[4] = cmd | 0x80;
        BigEndian::write_u16(&mut report[5..7], payload.len() as u16);

        let (first, rest) = payload.split_at(payload.len().min(INIT_PAYLOAD_MAX));
        report[7..7 + first.len()].copy_from_slice(first);
        hid.send_report(&report)?;

        for (seq, chunk) in rest.chunks(CONT_PAYLOAD_MAX).enumerate() {
            let mut cont = [0u8; REPORT_SIZE];
            BigEndian::write_u32(&mut cont[0..4], cid);
            cont[4] = (seq & 0x7F) as u8;
            cont[5..5 + chunk.len()].copy_from_slice(chunk);
            hid.send_report(&cont)?;
        }
        Ok(())
    }

    /// Reassemble one CTAPHID message. `KEEPALIVE` frames are consumed
    /// silently; `ERROR` frames abort with the embedded code.
    fn receive_message(
        hid: &HidTransport,
        cid: u32,
        timeout_ms: i32,
    ) -> Result<(u8, Vec<u8>), CtapHidError> {
        let mut expected_seq: u8 = 0;
        let mut cmd = 0u8;
        let mut declared_len = 0usize;
        let mut buf = Vec::new();

        loop {
            let report = hid.receive_report(timeout_ms)?;
            if report.len() < 5 {
                return Err(CtapHidError::ShortPacket);
            }
            let rcv_cid = BigEndian::read_u32(&report[0..4]);
            if rcv_cid != cid {
                continue; // belongs to a different channel's in-flight traffic
            }

            let is_init = report[4] & 0x80 != 0;
            if is_init {
                let rcv_cmd = report[4] & 0x7F;
                if rcv_cmd == CMD_KEEPALIVE {
                    continue;
                }
                if rcv_cmd == CMD_ERROR {
                    let code = *report.get(7).unwrap_or(&0xFF);
                    return Err(CtapHidError::ErrorFrame(code));
                }
                if report.len() < 7 {
                    return Err(CtapHidError::ShortPacket);
                }
                cmd = rcv_cmd;
                declared_len = BigEndian::read_u16(&report[5..7]) as usize;
                let chunk = &report[7..report.len().min(7 + declared_len)];
                buf.extend_from_slice(chunk);
                expected_seq = 0;
            } else {
                let seq = report[4];
                if seq != expected_seq {
                    return Err(CtapHidError::SequenceMismatch {
                        expected: expected_seq,
                        got: seq,
                    });
                }
                let remaining = declared_len.saturating_sub(buf.len());
                let take = remaining.min(report.len() - 5);
                buf.extend_from_slice(&report[5..5 + take]);
                expected_seq = expected_seq.wrapping_add(1);
            }

            if buf.len() >= declared_len {
                buf.truncate(declared_len);
                return Ok((cmd, buf));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ctaphid::*;

    #[test]
    fn ctaphid_constants_match_spec() {
        assert_eq!(BROADCAST_CID, 0xFFFF_FFFF);
        assert_eq!(CMD_INIT & 0x7F, 0x06);
        assert_eq!(CMD_MSG & 0x7F, 0x03);
        assert_eq!(CMD_CBOR & 0x7F, 0x10);
    }
}
