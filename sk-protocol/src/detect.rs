//! Multi-transport capability detection (spec.md §4.5). Probes are
//! restricted to the transport kind of the handle they are given: a HID
//! handle is only ever probed for `fido2`/`u2f`/`otp`, a CCID handle only
//! for `piv`/`openpgp`/`ndef`. This is strictly more correct than probing
//! every protocol on every handle — a CCID reader has no CTAPHID layer to
//! answer an `INIT` on, and vice versa — not a change in what gets
//! detected, only in where it's looked for.
//!
//! [`PROBE_TIMEOUT`] bounds every HID probe (`CtapHidChannel::init`,
//! `getInfo`, `U2F_VERSION`, the OTP `STATUS` frame all take it as an
//! explicit response timeout instead of the longer defaults those same
//! calls use outside detection). CCID probes have no equivalent knob to
//! thread it through: `pcsc::Card::transmit` is a synchronous call with no
//! application-level timeout parameter in this transport, so an
//! unresponsive CCID applet still blocks its own probe for as long as the
//! reader driver allows.

use std::time::Duration;

use log::debug;
use sk_transport_ccid::CcidTransport;
use sk_transport_hid::ctaphid::CtapHidChannel;
use sk_transport_hid::HidTransport;

use crate::Capabilities;

/// Upper bound on a single protocol probe, so one unresponsive applet
/// cannot stall detection of the others.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Probes a HID handle for `fido2`, `u2f`, and `otp`. A CTAPHID channel is
/// established once (INIT) and reused for both the CBOR `getInfo` probe
/// and the `U2F_VERSION` probe, since both ride the same channel.
pub fn detect_hid(hid: &HidTransport) -> Capabilities {
    let mut caps = Capabilities::default();
    let timeout_ms = PROBE_TIMEOUT.as_millis() as i32;

    let channel = match CtapHidChannel::init_with_timeout(hid, *b"SKDETECT", timeout_ms) {
        Ok(c) => c,
        Err(e) => {
            debug!("CTAPHID INIT failed, no FIDO2/U2F/OTP over this handle: {e}");
            return caps;
        }
    };

    match crate::ctap2::get_info_with_timeout(hid, &channel, timeout_ms) {
        Ok(info) => {
            caps.fido2 = info.versions.iter().any(|v| v.starts_with("FIDO_2"));
            debug!("fido2 probe: versions={:?}", info.versions);
        }
        Err(e) => debug!("fido2 probe failed: {e}"),
    }

    match crate::ctap1::version_with_timeout(hid, &channel, timeout_ms) {
        Ok(v) => {
            caps.u2f = v.trim_end_matches('\0') == "U2F_V2";
            debug!("u2f probe: version={v}");
        }
        Err(e) => debug!("u2f probe failed: {e}"),
    }

    match crate::otp::read_status_with_timeout(hid, timeout_ms) {
        Ok(slots) => {
            caps.otp = true;
            debug!("otp probe: {} slot(s) reported", slots.len());
        }
        Err(e) => debug!("otp probe failed: {e}"),
    }

    caps
}

/// Probes a CCID handle for `piv`, `openpgp`, and `ndef`. Each protocol
/// SELECTs its own AID first and does not rely on any prior SELECT state
/// (spec.md §9) — order among the three probes is therefore irrelevant.
pub fn detect_ccid(card: &mut CcidTransport) -> Capabilities {
    let mut caps = Capabilities::default();
    let mut scratch = crate::ApduLog::new();

    match crate::piv::select(card, &mut scratch) {
        Ok(()) => {
            caps.piv = true;
            debug!("piv probe: applet selected");
        }
        Err(e) => debug!("piv probe failed: {e}"),
    }

    scratch = crate::ApduLog::new();
    match crate::openpgp::select(card, &mut scratch) {
        Ok(()) => {
            caps.openpgp = true;
            debug!("openpgp probe: applet selected");
        }
        Err(e) => debug!("openpgp probe failed: {e}"),
    }

    scratch = crate::ApduLog::new();
    match crate::ndef::select_and_read_capabilities(card, &mut scratch) {
        Ok(cc) => {
            caps.ndef = true;
            debug!("ndef probe: max file size {}", cc.ndef_file_max_size);
        }
        Err(e) => debug!("ndef probe failed: {e}"),
    }

    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capabilities_are_all_false() {
        let caps = Capabilities::default();
        assert!(!caps.fido2 && !caps.u2f && !caps.piv && !caps.openpgp && !caps.otp && !caps.ndef);
    }

    #[test]
    fn probe_timeout_is_bounded() {
        assert!(PROBE_TIMEOUT <= Duration::from_secs(5));
    }
}
