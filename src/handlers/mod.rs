//! Dispatch target for every [`Command`](crate::dispatch::Command)
//! variant — one function per wire command, grouped into a submodule per
//! protocol family.

mod detect;
mod fido2;
mod ndef;
mod openpgp;
mod otp;
mod params;
mod piv;
mod system;
mod transport;
mod u2f;

use serde_json::Value;

use crate::dispatch::Command;
use crate::error::AgentError;
use crate::registry::DeviceRegistry;

pub fn handle(registry: &mut DeviceRegistry, command: Command, params: &Value) -> Result<Value, AgentError> {
    match command {
        Command::Ping => system::ping(),
        Command::GetVersion => system::get_version(),

        Command::ListDevices => transport::list_devices(registry),
        Command::OpenDevice => transport::open_device(registry, params),
        Command::CloseDevice => transport::close_device(registry, params),
        Command::SendHid => transport::send_hid(registry, params),
        Command::ReceiveHid => transport::receive_hid(registry, params),
        Command::TransmitApdu => transport::transmit_apdu(registry, params),

        Command::DetectProtocols => detect::detect_protocols(registry),

        Command::Fido2GetInfo => fido2::get_info(registry),
        Command::Fido2SetPin => fido2::set_pin(registry, params),
        Command::Fido2ChangePin => fido2::change_pin(registry, params),
        Command::Fido2GetPinRetries => fido2::get_pin_retries(registry),
        Command::Fido2ListCredentials => fido2::list_credentials(registry, params),
        Command::Fido2DeleteCredential => fido2::delete_credential(registry, params),
        Command::Fido2ResetDevice => fido2::reset_device(registry),

        Command::U2fVersion => u2f::version(registry),
        Command::U2fRegister => u2f::register(registry, params),
        Command::U2fAuthenticate => u2f::authenticate(registry, params),

        Command::PivGetData => piv::get_data(registry),
        Command::PivVerifyPin => piv::verify_pin(registry, params),
        Command::PivChangePin => piv::change_pin(registry, params),
        Command::PivChangePuk => piv::change_puk(registry, params),
        Command::PivGenerateKey => piv::generate_key(registry, params),
        Command::PivImportCertificate => piv::import_certificate(registry, params),
        Command::PivReadCertificate => piv::read_certificate(registry, params),
        Command::PivDeleteCertificate => piv::delete_certificate(registry, params),

        Command::OpenpgpSelect => openpgp::select(registry),
        Command::OpenpgpReadData => openpgp::read_data(registry),
        Command::OpenpgpChangePin => openpgp::change_pin(registry, params),
        Command::OpenpgpChangeAdminPin => openpgp::change_admin_pin(registry, params),
        Command::OpenpgpImportKey => openpgp::import_key(registry, params),
        Command::OpenpgpExportPublicKey => openpgp::export_public_key(registry, params),

        Command::OtpReadSlot => otp::read_slot(registry, params),
        Command::OtpWriteSlot => otp::write_slot(registry, params),
        Command::OtpDeleteSlot => otp::delete_slot(registry, params),
        Command::OtpSwapSlots => otp::swap_slots(registry),
        Command::OtpGenerateSeed => otp::generate_seed(params),

        Command::NdefRead => ndef::read(registry),
        Command::NdefWrite => ndef::write(registry, params),
        Command::NdefFormat => ndef::format(registry),
    }
}
