//! Request-scoped and protocol-scoped data types shared across engines
//! (spec.md §3).

use serde::{Deserialize, Serialize};

/// Six independent capability flags, computed only against an opened
/// device and never cached across reconnects.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub fido2: bool,
    pub u2f: bool,
    pub piv: bool,
    pub openpgp: bool,
    pub otp: bool,
    pub ndef: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusCategory {
    Ok,
    MoreData,
    Error,
}

impl From<sk_apdu::StatusCategory> for StatusCategory {
    fn from(c: sk_apdu::StatusCategory) -> Self {
        match c {
            sk_apdu::StatusCategory::Ok => StatusCategory::Ok,
            sk_apdu::StatusCategory::MoreData => StatusCategory::MoreData,
            sk_apdu::StatusCategory::Error => StatusCategory::Error,
        }
    }
}

/// One append-only entry in a request's APDU activity log (spec.md §3).
/// Owned by the handler, returned inline with the response it annotates,
/// discarded afterwards — never persisted by this type itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApduLogEntry {
    pub command: String,
    #[serde(rename = "commandHex")]
    pub command_hex: String,
    #[serde(rename = "responseHex")]
    pub response_hex: String,
    pub sw1: u8,
    pub sw2: u8,
    pub category: StatusCategory,
    pub description: String,
}

impl ApduLogEntry {
    pub fn record(command: &str, command_bytes: &[u8], answer: &sk_apdu::ApduAnswer) -> Self {
        Self {
            command: command.to_string(),
            command_hex: hex::encode(command_bytes),
            response_hex: hex::encode(answer.data()),
            sw1: answer.sw1,
            sw2: answer.sw2,
            category: answer.status_category().into(),
            description: sk_apdu::StatusWord::from(answer).to_string(),
        }
    }
}

/// Append-only per-request APDU trace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApduLog(pub Vec<ApduLogEntry>);

impl ApduLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ApduLogEntry) {
        self.0.push(entry);
    }
}

/// A PIV certificate slot (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PivSlotRecord {
    #[serde(rename = "slotId")]
    pub slot_id: u8,
    pub label: String,
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(rename = "notBefore", skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(rename = "notAfter", skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
}

/// Well-known PIV slot identifiers (spec.md §4.8).
pub mod piv_slots {
    pub const AUTHENTICATION: u8 = 0x9A;
    pub const SIGNATURE: u8 = 0x9C;
    pub const KEY_MANAGEMENT: u8 = 0x9D;
    pub const CARD_AUTH: u8 = 0x9E;
    pub const ATTESTATION: u8 = 0xF9;
    /// Retired key management slots 0x82..=0x95.
    pub const RETIRED_FIRST: u8 = 0x82;
    pub const RETIRED_LAST: u8 = 0x95;

    pub fn label(slot: u8) -> &'static str {
        match slot {
            AUTHENTICATION => "PIV Authentication",
            SIGNATURE => "Digital Signature",
            KEY_MANAGEMENT => "Key Management",
            CARD_AUTH => "Card Authentication",
            ATTESTATION => "Attestation",
            RETIRED_FIRST..=RETIRED_LAST => "Retired Key Management",
            _ => "Unknown",
        }
    }

    pub fn all_slots() -> Vec<u8> {
        let mut v = vec![AUTHENTICATION, SIGNATURE, KEY_MANAGEMENT, CARD_AUTH, ATTESTATION];
        v.extend(RETIRED_FIRST..=RETIRED_LAST);
        v
    }

    /// Object tag used in `GET DATA` for a slot's certificate object.
    pub fn cert_object_tag(slot: u8) -> [u8; 3] {
        match slot {
            AUTHENTICATION => [0x5F, 0xC1, 0x05],
            SIGNATURE => [0x5F, 0xC1, 0x0A],
            KEY_MANAGEMENT => [0x5F, 0xC1, 0x0B],
            CARD_AUTH => [0x5F, 0xC1, 0x01],
            ATTESTATION => [0x5F, 0xC1, 0x0D],
            retired @ RETIRED_FIRST..=RETIRED_LAST => {
                // Retired Key Management 1..20 (0x82..0x95) occupy object
                // tags 5FC10C..5FC11F in sequence (NIST SP 800-73-4).
                let idx = retired - RETIRED_FIRST;
                [0x5F, 0xC1, 0x0C + idx]
            }
            _ => [0x5F, 0xC1, 0x00],
        }
    }
}

/// An OTP slot (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OtpSlotRecord {
    pub slot: u8,
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub digits: u8,
    pub counter: u32,
    pub algorithm: String,
}
