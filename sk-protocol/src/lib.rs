//! Protocol-level engines layered on top of `sk-transport-hid` and
//! `sk-transport-ccid`: CTAP2, CTAP1/U2F, PIV, OpenPGP, OTP, NDEF, and the
//! multi-transport detection engine that probes for all six.

pub mod types;
pub mod der;
pub mod detect;
pub mod ctap1;
pub mod ctap2;
pub mod piv;
pub mod openpgp;
pub mod otp;
pub mod ndef;

pub use types::*;
