//! PIN protocol v1 (CTAP2 §5.5.2): ECDH key agreement over P-256, a
//! SHA-256 shared secret used directly as an AES-256-CBC key (zero IV) and
//! an HMAC-SHA-256 key (truncated to 16 bytes), and the `clientPIN`
//! subcommands built on top of it.

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ciborium::value::Value;
use hmac::{Hmac, Mac};
use log::debug;
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use sk_transport_hid::ctaphid::CtapHidChannel;
use sk_transport_hid::HidTransport;
use thiserror::Error;

use super::{cbor_exchange, command, status, Ctap2Error};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const ZERO_IV: [u8; 16] = [0u8; 16];
pub const PIN_UV_AUTH_PROTOCOL_ONE: u8 = 1;

pub mod subcommand {
    pub const GET_RETRIES: u8 = 0x01;
    pub const GET_KEY_AGREEMENT: u8 = 0x02;
    pub const SET_PIN: u8 = 0x03;
    pub const CHANGE_PIN: u8 = 0x04;
    pub const GET_PIN_TOKEN: u8 = 0x05;
}

#[derive(Error, Debug)]
pub enum PinError {
    #[error(transparent)]
    Ctap2(#[from] Ctap2Error),
    #[error("PIN must be between 4 and 63 bytes")]
    InvalidPinLength,
    #[error("authenticator key agreement response was malformed")]
    MalformedKeyAgreement,
    #[error("PIN is incorrect")]
    PinInvalid,
    #[error("PIN is blocked after too many incorrect attempts")]
    PinBlocked,
    #[error("no PIN is set on this authenticator")]
    PinNotSet,
    #[error("a PIN is already set on this authenticator")]
    PinAlreadySet,
}

fn map_status(e: Ctap2Error) -> PinError {
    match e {
        Ctap2Error::Status(status::PIN_INVALID) => PinError::PinInvalid,
        Ctap2Error::Status(status::PIN_BLOCKED) | Ctap2Error::Status(status::PIN_AUTH_BLOCKED) => {
            PinError::PinBlocked
        }
        Ctap2Error::Status(status::PIN_NOT_SET) => PinError::PinNotSet,
        other => PinError::Ctap2(other),
    }
}

/// One ECDH key-agreement exchange between this process (the platform)
/// and a single authenticator. Dropped at the end of every PIN operation
/// — nothing here outlives the handler call that created it.
pub struct PinSession {
    platform_secret: SecretKey,
    platform_public: PublicKey,
    shared_secret: [u8; 32],
}

impl PinSession {
    /// Performs `getKeyAgreement` and derives the shared secret.
    pub fn establish(hid: &HidTransport, channel: &CtapHidChannel) -> Result<Self, PinError> {
        let platform_secret = SecretKey::random(&mut OsRng);
        let platform_public = platform_secret.public_key();

        let params = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer((PIN_UV_AUTH_PROTOCOL_ONE as i64).into())),
            (Value::Integer(2.into()), Value::Integer((subcommand::GET_KEY_AGREEMENT as i64).into())),
        ]);
        let resp = cbor_exchange(hid, channel, command::CLIENT_PIN, Some(params)).map_err(map_status)?;
        let map = resp.as_map().ok_or(PinError::MalformedKeyAgreement)?;
        let cose_key = map
            .iter()
            .find(|(k, _)| k.as_integer().map(i128::from) == Some(1))
            .map(|(_, v)| v)
            .ok_or(PinError::MalformedKeyAgreement)?;
        let authenticator_public = decode_cose_p256_key(cose_key)?;

        let shared_point = diffie_hellman(
            platform_secret.to_nonzero_scalar(),
            authenticator_public.as_affine(),
        );
        let x_coordinate = shared_point.raw_secret_bytes();
        let shared_secret: [u8; 32] = Sha256::digest(x_coordinate).into();

        debug!("established CTAP2 PIN protocol v1 shared secret");
        Ok(Self {
            platform_secret,
            platform_public,
            shared_secret,
        })
    }

    fn platform_cose_key(&self) -> Value {
        let point = self.platform_public.to_encoded_point(false);
        Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())), // kty: EC2
            (Value::Integer(3.into()), Value::Integer((-25).into())), // alg: ECDH-ES+HKDF-256
            (Value::Integer((-1).into()), Value::Integer(1.into())), // crv: P-256
            (Value::Integer((-2).into()), Value::Bytes(point.x().unwrap().to_vec())),
            (Value::Integer((-3).into()), Value::Bytes(point.y().unwrap().to_vec())),
        ])
    }

    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let enc = Aes256CbcEnc::new(&self.shared_secret.into(), &ZERO_IV.into());
        enc.encrypt_padded_vec_mut::<cbc::cipher::block_padding::NoPadding>(plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        let dec = Aes256CbcDec::new(&self.shared_secret.into(), &ZERO_IV.into());
        dec.decrypt_padded_vec_mut::<cbc::cipher::block_padding::NoPadding>(ciphertext)
            .unwrap_or_default()
    }

    fn hmac(&self, data: &[u8]) -> [u8; 16] {
        let mut mac = HmacSha256::new_from_slice(&self.shared_secret).expect("HMAC accepts any key length");
        mac.update(data);
        let full = mac.finalize().into_bytes();
        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        out
    }

    fn pin_hash_enc(&self, pin: &str) -> Vec<u8> {
        let digest = Sha256::digest(pin.as_bytes());
        self.encrypt(&digest[..16])
    }

    /// `getPinRetries`: how many attempts remain before the PIN is blocked.
    /// Does not require the key-agreement shared secret.
    pub fn get_pin_retries(hid: &HidTransport, channel: &CtapHidChannel) -> Result<u32, PinError> {
        let params = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer((PIN_UV_AUTH_PROTOCOL_ONE as i64).into())),
            (Value::Integer(2.into()), Value::Integer((subcommand::GET_RETRIES as i64).into())),
        ]);
        let resp = cbor_exchange(hid, channel, command::CLIENT_PIN, Some(params)).map_err(map_status)?;
        let map = resp.as_map().ok_or(PinError::MalformedKeyAgreement)?;
        let retries = map
            .iter()
            .find(|(k, _)| k.as_integer().map(i128::from) == Some(3))
            .and_then(|(_, v)| v.as_integer())
            .map(|i| i128::from(i) as u32)
            .unwrap_or(0);
        Ok(retries)
    }

    /// `setPIN`: callers must first check `GetInfoResponse::client_pin_set`
    /// and refuse locally with `PinAlreadySet` — the authenticator's own
    /// rejection of a second `setPIN` is not a distinct, reliable status
    /// code across vendors, so the check happens here in the agent.
    pub fn set_pin(&self, hid: &HidTransport, channel: &CtapHidChannel, new_pin: &str) -> Result<(), PinError> {
        validate_pin(new_pin)?;
        let new_pin_enc = self.encrypt(&pad_pin(new_pin));
        let pin_uv_auth_param = self.hmac(&new_pin_enc);

        let params = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer((PIN_UV_AUTH_PROTOCOL_ONE as i64).into())),
            (Value::Integer(2.into()), Value::Integer((subcommand::SET_PIN as i64).into())),
            (Value::Integer(3.into()), self.platform_cose_key()),
            (Value::Integer(4.into()), Value::Bytes(pin_uv_auth_param.to_vec())),
            (Value::Integer(5.into()), Value::Bytes(new_pin_enc)),
        ]);
        cbor_exchange(hid, channel, command::CLIENT_PIN, Some(params)).map_err(map_status)?;
        Ok(())
    }

    pub fn change_pin(
        &self,
        hid: &HidTransport,
        channel: &CtapHidChannel,
        current_pin: &str,
        new_pin: &str,
    ) -> Result<(), PinError> {
        validate_pin(new_pin)?;
        let new_pin_enc = self.encrypt(&pad_pin(new_pin));
        let pin_hash_enc = self.pin_hash_enc(current_pin);
        let mut auth_input = Vec::with_capacity(new_pin_enc.len() + pin_hash_enc.len());
        auth_input.extend_from_slice(&new_pin_enc);
        auth_input.extend_from_slice(&pin_hash_enc);
        let pin_uv_auth_param = self.hmac(&auth_input);

        let params = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer((PIN_UV_AUTH_PROTOCOL_ONE as i64).into())),
            (Value::Integer(2.into()), Value::Integer((subcommand::CHANGE_PIN as i64).into())),
            (Value::Integer(3.into()), self.platform_cose_key()),
            (Value::Integer(4.into()), Value::Bytes(pin_uv_auth_param.to_vec())),
            (Value::Integer(5.into()), Value::Bytes(new_pin_enc)),
            (Value::Integer(6.into()), Value::Bytes(pin_hash_enc)),
        ]);
        cbor_exchange(hid, channel, command::CLIENT_PIN, Some(params)).map_err(map_status)?;
        Ok(())
    }

    /// `getPinToken`: returns the decrypted token, valid for the lifetime
    /// of the authenticator's current power cycle or until explicitly
    /// invalidated. Callers pass it back as `pinUvAuthParam` material for
    /// subsequent `makeCredential`/`getAssertion`/`credentialManagement`
    /// calls; this module does not cache it.
    pub fn get_pin_token(
        &self,
        hid: &HidTransport,
        channel: &CtapHidChannel,
        pin: &str,
    ) -> Result<PinToken, PinError> {
        let pin_hash_enc = self.pin_hash_enc(pin);
        let params = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer((PIN_UV_AUTH_PROTOCOL_ONE as i64).into())),
            (Value::Integer(2.into()), Value::Integer((subcommand::GET_PIN_TOKEN as i64).into())),
            (Value::Integer(3.into()), self.platform_cose_key()),
            (Value::Integer(6.into()), Value::Bytes(pin_hash_enc)),
        ]);
        let resp = cbor_exchange(hid, channel, command::CLIENT_PIN, Some(params)).map_err(map_status)?;
        let map = resp.as_map().ok_or(PinError::MalformedKeyAgreement)?;
        let enc_token = map
            .iter()
            .find(|(k, _)| k.as_integer().map(i128::from) == Some(2))
            .and_then(|(_, v)| v.as_bytes())
            .ok_or(PinError::MalformedKeyAgreement)?;
        let token = self.decrypt(enc_token);
        Ok(PinToken(token))
    }
}

/// A decrypted `pinUvAuthToken`. Zeroed on drop without pulling in a
/// dedicated zeroing crate — a single explicit overwrite covers this
/// type's one field.
pub struct PinToken(Vec<u8>);

impl PinToken {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// HMAC-SHA-256(token, client_data_hash)[..16], the `pinUvAuthParam`
    /// sent alongside `makeCredential`/`getAssertion` requests.
    pub fn auth_param(&self, client_data_hash: &[u8]) -> [u8; 16] {
        let mut mac = HmacSha256::new_from_slice(&self.0).expect("HMAC accepts any key length");
        mac.update(client_data_hash);
        let full = mac.finalize().into_bytes();
        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        out
    }
}

impl Drop for PinToken {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            *byte = 0;
        }
    }
}

fn validate_pin(pin: &str) -> Result<(), PinError> {
    let len = pin.as_bytes().len();
    if !(4..=63).contains(&len) {
        return Err(PinError::InvalidPinLength);
    }
    Ok(())
}

/// PIN protocol v1 pads the UTF-8 PIN with zero bytes to a 64-byte block
/// before encryption.
fn pad_pin(pin: &str) -> [u8; 64] {
    let mut buf = [0u8; 64];
    let bytes = pin.as_bytes();
    buf[..bytes.len()].copy_from_slice(bytes);
    buf
}

fn decode_cose_p256_key(value: &Value) -> Result<PublicKey, PinError> {
    let map = value.as_map().ok_or(PinError::MalformedKeyAgreement)?;
    let x = map
        .iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(-2))
        .and_then(|(_, v)| v.as_bytes())
        .ok_or(PinError::MalformedKeyAgreement)?;
    let y = map
        .iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(-3))
        .and_then(|(_, v)| v.as_bytes())
        .ok_or(PinError::MalformedKeyAgreement)?;

    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(y);
    PublicKey::from_sec1_bytes(&sec1).map_err(|_| PinError::MalformedKeyAgreement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_pin() {
        assert!(matches!(validate_pin("123"), Err(PinError::InvalidPinLength)));
    }

    #[test]
    fn accepts_boundary_pin_lengths() {
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin(&"1".repeat(63)).is_ok());
        assert!(validate_pin(&"1".repeat(64)).is_err());
    }

    #[test]
    fn pads_pin_to_64_bytes() {
        let padded = pad_pin("1234");
        assert_eq!(padded.len(), 64);
        assert_eq!(&padded[..4], b"1234");
        assert!(padded[4..].iter().all(|&b| b == 0));
    }
}
