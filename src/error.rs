//! The wire error taxonomy (spec.md §7): every failure this agent can
//! report collapses to one of these codes, each with a platform-stable
//! machine code and a secret-free human message.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("device {0:?} not found")]
    NotFound(String),
    #[error("another device is already open")]
    Busy,
    #[error("no device is open")]
    NotOpen,
    #[error("device is already open")]
    AlreadyOpen,
    #[error("operation timed out")]
    Timeout,
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("command requires a {0} device")]
    DeviceTypeMismatch(&'static str),
    #[error("CTAPHID error, frame code {0:#04x}")]
    CtapHidError(u8),
    #[error("CTAP2 error, status {0:#04x}")]
    Ctap2Error(u8),
    #[error("U2F device error, status word {0:04X}")]
    Ctap1Error(u16),
    #[error("APDU error, status word {0:04X}")]
    ApduError(u16),
    #[error("PIN is incorrect")]
    PinInvalid,
    #[error("PIN is blocked")]
    PinBlocked,
    #[error("PIN is too short")]
    PinTooShort,
    #[error("a PIN is already set")]
    PinAlreadySet,
    #[error("user did not act in time")]
    UserActionTimeout,
    #[error("user presence is required")]
    UserPresenceRequired,
    #[error("could not decode the supplied data: {0}")]
    FormatError(String),
    #[error("slot swap failed and the original contents were restored")]
    SwapFailed,
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCommand(_) => "UNKNOWN_COMMAND",
            Self::InvalidParams(_) => "INVALID_PARAMS",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Busy => "BUSY",
            Self::NotOpen => "NOT_OPEN",
            Self::AlreadyOpen => "ALREADY_OPEN",
            Self::Timeout => "TIMEOUT",
            Self::IoError(_) => "IO_ERROR",
            Self::DeviceTypeMismatch(_) => "DEVICE_TYPE_MISMATCH",
            Self::CtapHidError(_) => "CTAPHID_ERROR",
            Self::Ctap2Error(_) => "CTAP2_ERROR",
            Self::Ctap1Error(_) => "CTAP1_ERROR",
            Self::ApduError(_) => "APDU_ERROR",
            Self::PinInvalid => "PIN_INVALID",
            Self::PinBlocked => "PIN_BLOCKED",
            Self::PinTooShort => "PIN_TOO_SHORT",
            Self::PinAlreadySet => "PIN_ALREADY_SET",
            Self::UserActionTimeout => "USER_ACTION_TIMEOUT",
            Self::UserPresenceRequired => "USER_PRESENCE_REQUIRED",
            Self::FormatError(_) => "FORMAT_ERROR",
            Self::SwapFailed => "SWAP_FAILED",
        }
    }
}

impl From<sk_transport_hid::HidTransportError> for AgentError {
    fn from(e: sk_transport_hid::HidTransportError) -> Self {
        match e {
            sk_transport_hid::HidTransportError::Timeout => AgentError::Timeout,
            other => AgentError::IoError(other.to_string()),
        }
    }
}

impl From<sk_transport_hid::ctaphid::CtapHidError> for AgentError {
    fn from(e: sk_transport_hid::ctaphid::CtapHidError) -> Self {
        match e {
            sk_transport_hid::ctaphid::CtapHidError::ErrorFrame(code) => AgentError::CtapHidError(code),
            other => AgentError::IoError(other.to_string()),
        }
    }
}

impl From<sk_transport_ccid::CcidTransportError> for AgentError {
    fn from(e: sk_transport_ccid::CcidTransportError) -> Self {
        AgentError::IoError(e.to_string())
    }
}

impl From<sk_apdu::ApduAnswerError> for AgentError {
    fn from(e: sk_apdu::ApduAnswerError) -> Self {
        AgentError::IoError(e.to_string())
    }
}

impl From<sk_protocol::ctap1::U2fError> for AgentError {
    fn from(e: sk_protocol::ctap1::U2fError) -> Self {
        match e {
            sk_protocol::ctap1::U2fError::UserPresenceTimeout => AgentError::UserActionTimeout,
            sk_protocol::ctap1::U2fError::DeviceError { sw1, sw2 } => {
                AgentError::Ctap1Error(u16::from_be_bytes([sw1, sw2]))
            }
            other => AgentError::IoError(other.to_string()),
        }
    }
}

impl From<sk_protocol::ctap2::Ctap2Error> for AgentError {
    fn from(e: sk_protocol::ctap2::Ctap2Error) -> Self {
        match e {
            sk_protocol::ctap2::Ctap2Error::Status(status) => AgentError::Ctap2Error(status),
            other => AgentError::IoError(other.to_string()),
        }
    }
}

impl From<sk_protocol::ctap2::pin::PinError> for AgentError {
    fn from(e: sk_protocol::ctap2::pin::PinError) -> Self {
        match e {
            sk_protocol::ctap2::pin::PinError::Ctap2(inner) => inner.into(),
            sk_protocol::ctap2::pin::PinError::InvalidPinLength => AgentError::PinTooShort,
            sk_protocol::ctap2::pin::PinError::PinInvalid => AgentError::PinInvalid,
            sk_protocol::ctap2::pin::PinError::PinBlocked => AgentError::PinBlocked,
            sk_protocol::ctap2::pin::PinError::PinNotSet => AgentError::InvalidRequest("no PIN is set".into()),
            sk_protocol::ctap2::pin::PinError::PinAlreadySet => AgentError::PinAlreadySet,
            sk_protocol::ctap2::pin::PinError::MalformedKeyAgreement => {
                AgentError::IoError("malformed key agreement response".into())
            }
        }
    }
}

impl From<sk_protocol::piv::PivError> for AgentError {
    fn from(e: sk_protocol::piv::PivError) -> Self {
        match e {
            sk_protocol::piv::PivError::PinIncorrect { .. } => AgentError::PinInvalid,
            sk_protocol::piv::PivError::PinBlocked => AgentError::PinBlocked,
            sk_protocol::piv::PivError::CardError { sw1, sw2 } => {
                AgentError::ApduError(u16::from_be_bytes([sw1, sw2]))
            }
            sk_protocol::piv::PivError::AppletNotSelected => AgentError::NotFound("PIV applet".into()),
            sk_protocol::piv::PivError::Der(inner) => AgentError::FormatError(inner.to_string()),
            sk_protocol::piv::PivError::Transport(inner) => AgentError::IoError(inner.to_string()),
        }
    }
}

impl From<sk_protocol::openpgp::OpenPgpError> for AgentError {
    fn from(e: sk_protocol::openpgp::OpenPgpError) -> Self {
        match e {
            sk_protocol::openpgp::OpenPgpError::PinIncorrect { .. } => AgentError::PinInvalid,
            sk_protocol::openpgp::OpenPgpError::PinBlocked => AgentError::PinBlocked,
            sk_protocol::openpgp::OpenPgpError::CardError { sw1, sw2 } => {
                AgentError::ApduError(u16::from_be_bytes([sw1, sw2]))
            }
            sk_protocol::openpgp::OpenPgpError::AppletNotSelected => AgentError::NotFound("OpenPGP applet".into()),
            sk_protocol::openpgp::OpenPgpError::Transport(inner) => AgentError::IoError(inner.to_string()),
        }
    }
}

impl From<sk_protocol::otp::OtpError> for AgentError {
    fn from(e: sk_protocol::otp::OtpError) -> Self {
        match e {
            sk_protocol::otp::OtpError::UnrecognizedSeedFormat | sk_protocol::otp::OtpError::InvalidSeedLength(_) => {
                AgentError::FormatError(e.to_string())
            }
            sk_protocol::otp::OtpError::SwapFailed(_) => AgentError::SwapFailed,
            other => AgentError::IoError(other.to_string()),
        }
    }
}

impl From<sk_protocol::ndef::NdefError> for AgentError {
    fn from(e: sk_protocol::ndef::NdefError) -> Self {
        match e {
            sk_protocol::ndef::NdefError::CardError { sw1, sw2 } => AgentError::ApduError(u16::from_be_bytes([sw1, sw2])),
            sk_protocol::ndef::NdefError::AppletNotSelected => AgentError::NotFound("NDEF application".into()),
            sk_protocol::ndef::NdefError::MalformedCapabilityContainer => {
                AgentError::FormatError("malformed capability container".into())
            }
            sk_protocol::ndef::NdefError::MessageTooLarge(..) => AgentError::FormatError(e.to_string()),
            sk_protocol::ndef::NdefError::Transport(inner) => AgentError::IoError(inner.to_string()),
        }
    }
}
