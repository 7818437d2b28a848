//! Typed command dispatch (spec.md §9 REDESIGN FLAGS): commands are
//! parsed into a [`Command`] enum once, up front — an unrecognized name
//! is a decode-time `UNKNOWN_COMMAND`, not a fallthrough branch buried in
//! a handler.

use serde_json::Value;

use crate::error::AgentError;
use crate::registry::DeviceRegistry;

#[derive(Debug)]
pub struct Request {
    pub id: Value,
    pub command: String,
    pub params: Value,
}

impl Request {
    pub fn parse(raw: &Value) -> Result<Self, AgentError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| AgentError::InvalidRequest("request must be a JSON object".into()))?;
        let id = obj
            .get("id")
            .cloned()
            .ok_or_else(|| AgentError::InvalidRequest("missing \"id\"".into()))?;
        let command = obj
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidRequest("missing \"command\"".into()))?
            .to_string();
        let params = obj.get("params").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        Ok(Self { id, command, params })
    }
}

pub fn success_envelope(id: Value, result: Value) -> Value {
    serde_json::json!({ "id": id, "status": "ok", "result": result })
}

pub fn error_envelope(id: Value, err: &AgentError) -> Value {
    serde_json::json!({
        "id": id,
        "status": "error",
        "error": { "code": err.code(), "message": err.to_string() }
    })
}

macro_rules! commands {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum Command {
            $($variant),+
        }

        impl Command {
            pub fn from_wire_name(name: &str) -> Option<Self> {
                match name {
                    $($wire => Some(Command::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

commands! {
    Ping => "ping",
    GetVersion => "getVersion",
    ListDevices => "listDevices",
    OpenDevice => "openDevice",
    CloseDevice => "closeDevice",
    SendHid => "sendHid",
    ReceiveHid => "receiveHid",
    TransmitApdu => "transmitApdu",
    DetectProtocols => "detectProtocols",
    Fido2GetInfo => "fido2GetInfo",
    Fido2SetPin => "fido2SetPin",
    Fido2ChangePin => "fido2ChangePin",
    Fido2GetPinRetries => "fido2GetPinRetries",
    Fido2ListCredentials => "fido2ListCredentials",
    Fido2DeleteCredential => "fido2DeleteCredential",
    Fido2ResetDevice => "fido2ResetDevice",
    U2fVersion => "u2fVersion",
    U2fRegister => "u2fRegister",
    U2fAuthenticate => "u2fAuthenticate",
    PivGetData => "pivGetData",
    PivVerifyPin => "pivVerifyPin",
    PivChangePin => "pivChangePin",
    PivChangePuk => "pivChangePuk",
    PivGenerateKey => "pivGenerateKey",
    PivImportCertificate => "pivImportCertificate",
    PivReadCertificate => "pivReadCertificate",
    PivDeleteCertificate => "pivDeleteCertificate",
    OpenpgpSelect => "openpgpSelect",
    OpenpgpReadData => "openpgpReadData",
    OpenpgpChangePin => "openpgpChangePin",
    OpenpgpChangeAdminPin => "openpgpChangeAdminPin",
    OpenpgpImportKey => "openpgpImportKey",
    OpenpgpExportPublicKey => "openpgpExportPublicKey",
    OtpReadSlot => "otpReadSlot",
    OtpWriteSlot => "otpWriteSlot",
    OtpDeleteSlot => "otpDeleteSlot",
    OtpSwapSlots => "otpSwapSlots",
    OtpGenerateSeed => "otpGenerateSeed",
    NdefRead => "ndefRead",
    NdefWrite => "ndefWrite",
    NdefFormat => "ndefFormat",
}

/// Decodes, routes, and fully handles one request, never panicking: any
/// handler error becomes an `error` envelope rather than propagating.
pub fn dispatch(registry: &mut DeviceRegistry, request: &Request) -> Result<Value, AgentError> {
    let command = Command::from_wire_name(&request.command)
        .ok_or_else(|| AgentError::UnknownCommand(request.command.clone()))?;
    crate::handlers::handle(registry, command, &request.params)
}
