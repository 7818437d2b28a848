//! ISO-7816 APDU command/response types shared by the CCID and CTAP1
//! transports.
//!
//! Grounded on `ledger-apdu`'s `APDUCommand`/`APDUAnswer` pair, generalized
//! from Ledger's narrow status-word table to the broader ISO-7816 table this
//! agent needs for PIV, OpenPGP and U2F.

use std::fmt;

/// A command APDU in the short (single-byte `Lc`/`Le`) form used throughout
/// this agent. Extended-length APDUs (used for NDEF's larger `UPDATE BINARY`
/// writes) are built with [`ApduCommand::serialize_extended`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length; `0` means "no preference" (absent `Le`).
    pub le: u8,
}

impl ApduCommand {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le: 0,
        }
    }

    pub fn with_le(mut self, le: u8) -> Self {
        self.le = le;
        self
    }

    /// Serialize to the short form: `CLA INS P1 P2 [Lc data] [Le]`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(5 + self.data.len());
        v.push(self.cla);
        v.push(self.ins);
        v.push(self.p1);
        v.push(self.p2);
        if !self.data.is_empty() {
            v.push(self.data.len() as u8);
            v.extend_from_slice(&self.data);
        }
        if self.le != 0 {
            v.push(self.le);
        }
        v
    }

    /// Serialize to the BER-TLV extended-length form: `CLA INS P1 P2 00 Lc(2) data`.
    pub fn serialize_extended(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(7 + self.data.len());
        v.push(self.cla);
        v.push(self.ins);
        v.push(self.p1);
        v.push(self.p2);
        v.push(0x00);
        v.push((self.data.len() >> 8) as u8);
        v.push(self.data.len() as u8);
        v.extend_from_slice(&self.data);
        v
    }
}

impl fmt::Display for ApduCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.serialize()))
    }
}

/// A response APDU: payload bytes plus the trailing `SW1 SW2`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduAnswer {
    data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ApduAnswerError {
    #[error("answer too short (< 2 bytes)")]
    TooShort,
}

impl ApduAnswer {
    pub fn from_bytes(mut answer: Vec<u8>) -> Result<Self, ApduAnswerError> {
        if answer.len() < 2 {
            return Err(ApduAnswerError::TooShort);
        }
        let sw2 = answer.pop().unwrap();
        let sw1 = answer.pop().unwrap();
        Ok(Self {
            data: answer,
            sw1,
            sw2,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn sw(&self) -> u16 {
        ((self.sw1 as u16) << 8) | self.sw2 as u16
    }

    pub fn is_success(&self) -> bool {
        self.sw() == 0x9000
    }

    /// `Some(remaining)` for `61XX` ("more data available via GET RESPONSE").
    pub fn more_data(&self) -> Option<u8> {
        (self.sw1 == 0x61).then_some(self.sw2)
    }

    /// `Some(correct_le)` for `6CXX` ("wrong Le, retransmit with this one").
    pub fn wrong_le(&self) -> Option<u8> {
        (self.sw1 == 0x6C).then_some(self.sw2)
    }

    /// `Some(retries_left)` for `63CX` ("verification failed, X retries left").
    pub fn retries_remaining(&self) -> Option<u8> {
        (self.sw1 == 0x63 && (self.sw2 & 0xF0) == 0xC0).then_some(self.sw2 & 0x0F)
    }

    pub fn status_category(&self) -> StatusCategory {
        match self.sw() {
            0x9000 => StatusCategory::Ok,
            sw if (sw & 0xFF00) == 0x6100 => StatusCategory::MoreData,
            _ => StatusCategory::Error,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StatusCategory {
    Ok,
    MoreData,
    Error,
}

/// Common ISO-7816 status words surfaced across PIV, OpenPGP, U2F and NDEF.
/// Unlike `ledger-apdu`'s Ledger-specific subset, this table is scoped to
/// the smart-card and FIDO status words this agent's protocol engines
/// actually branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusWord {
    Success,
    MoreDataAvailable(u8),
    WrongLe(u8),
    VerifyFailed { retries: u8 },
    WarningNvmUnchanged,
    MemoryFailure,
    WrongLength,
    SecurityNotSatisfied,
    AuthenticationBlocked,
    DataInvalid,
    ConditionsNotSatisfied,
    CommandNotAllowed,
    IncorrectParameters,
    FileNotFound,
    WrongP1P2,
    InsNotSupported,
    ClaNotSupported,
    Other(u16),
}

impl From<&ApduAnswer> for StatusWord {
    fn from(a: &ApduAnswer) -> Self {
        let sw = a.sw();
        match sw {
            0x9000 => StatusWord::Success,
            0x6300 => StatusWord::WarningNvmUnchanged,
            0x6581 => StatusWord::MemoryFailure,
            0x6700 => StatusWord::WrongLength,
            0x6982 => StatusWord::SecurityNotSatisfied,
            0x6983 => StatusWord::AuthenticationBlocked,
            0x6984 => StatusWord::DataInvalid,
            0x6985 => StatusWord::ConditionsNotSatisfied,
            0x6986 => StatusWord::CommandNotAllowed,
            0x6A80 => StatusWord::IncorrectParameters,
            0x6A82 => StatusWord::FileNotFound,
            0x6A86 => StatusWord::WrongP1P2,
            0x6D00 => StatusWord::InsNotSupported,
            0x6E00 => StatusWord::ClaNotSupported,
            _ if (sw >> 8) == 0x61 => StatusWord::MoreDataAvailable(sw as u8),
            _ if (sw >> 8) == 0x6C => StatusWord::WrongLe(sw as u8),
            _ if (sw & 0xFFF0) == 0x63C0 => StatusWord::VerifyFailed {
                retries: (sw & 0x0F) as u8,
            },
            other => StatusWord::Other(other),
        }
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusWord::Success => write!(f, "success (9000)"),
            StatusWord::MoreDataAvailable(n) => write!(f, "more data available (61{:02X})", n),
            StatusWord::WrongLe(n) => write!(f, "wrong Le, expected {:02X} (6C{:02X})", n, n),
            StatusWord::VerifyFailed { retries } => {
                write!(f, "verification failed, {} retries left", retries)
            }
            StatusWord::WarningNvmUnchanged => write!(f, "warning: NVM unchanged (6300)"),
            StatusWord::MemoryFailure => write!(f, "memory failure (6581)"),
            StatusWord::WrongLength => write!(f, "wrong length (6700)"),
            StatusWord::SecurityNotSatisfied => write!(f, "security status not satisfied (6982)"),
            StatusWord::AuthenticationBlocked => write!(f, "authentication method blocked (6983)"),
            StatusWord::DataInvalid => write!(f, "data invalid (6984)"),
            StatusWord::ConditionsNotSatisfied => {
                write!(f, "conditions of use not satisfied (6985)")
            }
            StatusWord::CommandNotAllowed => write!(f, "command not allowed (6986)"),
            StatusWord::IncorrectParameters => write!(f, "incorrect parameters in data (6A80)"),
            StatusWord::FileNotFound => write!(f, "file or application not found (6A82)"),
            StatusWord::WrongP1P2 => write!(f, "incorrect P1/P2 (6A86)"),
            StatusWord::InsNotSupported => write!(f, "instruction not supported (6D00)"),
            StatusWord::ClaNotSupported => write!(f, "class not supported (6E00)"),
            StatusWord::Other(sw) => write!(f, "status word {:04X}", sw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_short_form() {
        let cmd = ApduCommand::new(0x00, 0xA4, 0x04, 0x00, vec![0xA0, 0x00, 0x00, 0x03, 0x08]);
        assert_eq!(
            cmd.serialize(),
            vec![0x00, 0xA4, 0x04, 0x00, 0x05, 0xA0, 0x00, 0x00, 0x03, 0x08]
        );
    }

    #[test]
    fn answer_success() {
        let a = ApduAnswer::from_bytes(vec![0xDE, 0xAD, 0x90, 0x00]).unwrap();
        assert!(a.is_success());
        assert_eq!(a.data(), &[0xDE, 0xAD]);
        assert_eq!(StatusWord::from(&a), StatusWord::Success);
    }

    #[test]
    fn answer_too_short() {
        assert_eq!(
            ApduAnswer::from_bytes(vec![0x90]).unwrap_err(),
            ApduAnswerError::TooShort
        );
    }

    #[test]
    fn more_data_chaining_codes() {
        let a = ApduAnswer::from_bytes(vec![0x61, 0x10]).unwrap();
        assert_eq!(a.more_data(), Some(0x10));
        assert_eq!(a.status_category(), StatusCategory::MoreData);

        let b = ApduAnswer::from_bytes(vec![0x6C, 0x05]).unwrap();
        assert_eq!(b.wrong_le(), Some(0x05));
    }

    #[test]
    fn verify_retry_counter() {
        let a = ApduAnswer::from_bytes(vec![0x63, 0xC3]).unwrap();
        assert_eq!(a.retries_remaining(), Some(3));
        assert_eq!(StatusWord::from(&a), StatusWord::VerifyFailed { retries: 3 });
    }
}
