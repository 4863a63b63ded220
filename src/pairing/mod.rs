//! Pairing material: key generation (X25519, Ed25519), signed device identity,
//! the pairing code string and its scannable QR rendering.

use crate::error::{Error, PairingError};
use crate::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use qrcode::QrCode;
use rand::RngCore;
use std::io::Cursor;
use x25519_dalek::{PublicKey, StaticSecret};

/// Prefix of every rendered pairing artifact.
pub const DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Smallest edge of the rendered QR image, in pixels.
const QR_MIN_SIZE: u32 = 256;

/// Keys generated for pairing: Noise key, identity key, and adv secret.
#[derive(Clone, Debug)]
pub struct PairingKeys {
    /// X25519 Noise public key (32 bytes).
    pub noise_public: [u8; 32],
    /// X25519 Noise private key (32 bytes).
    pub noise_private: [u8; 32],
    /// Ed25519 identity public key (32 bytes).
    pub identity_public: [u8; 32],
    /// Ed25519 identity private key (32 bytes).
    pub identity_private: [u8; 32],
    /// Adv secret for pairing (32 bytes).
    pub adv_secret: [u8; 32],
}

/// Generate fresh pairing keys: Noise (X25519), identity (Ed25519), and adv secret.
pub fn generate_pairing_keys() -> PairingKeys {
    let mut noise_private = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut noise_private);
    let secret = StaticSecret::from(noise_private);
    let noise_public = PublicKey::from(&secret).to_bytes();

    let identity_signing = SigningKey::generate(&mut rand::thread_rng());
    let identity_public = identity_signing.verifying_key().to_bytes();
    let identity_private = identity_signing.to_bytes();

    let mut adv_secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut adv_secret);

    PairingKeys {
        noise_public,
        noise_private,
        identity_public,
        identity_private,
        adv_secret,
    }
}

/// Pairing code as the phone expects to scan it: `ref,noise,identity,adv`
/// with each key base64-encoded.
pub fn pairing_code(reference: &str, keys: &PairingKeys) -> String {
    format!(
        "{},{},{},{}",
        reference,
        STANDARD.encode(keys.noise_public),
        STANDARD.encode(keys.identity_public),
        STANDARD.encode(keys.adv_secret)
    )
}

/// Render a pairing code as a PNG QR code wrapped in a data URI.
pub fn render_qr_data_uri(code: &str) -> Result<String> {
    let qr = QrCode::new(code.as_bytes())
        .map_err(|e| Error::Pairing(PairingError::QrRender(e.to_string())))?;
    let img = qr
        .render::<image::Luma<u8>>()
        .min_dimensions(QR_MIN_SIZE, QR_MIN_SIZE)
        .build();

    let mut png = Cursor::new(Vec::new());
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| Error::Pairing(PairingError::QrRender(e.to_string())))?;

    Ok(format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(png.into_inner())))
}

/// Build a signed device identity blob for storage: verifying_key (32) || signature (64) || payload.
pub fn sign_device_identity(payload: &[u8], identity_private: &[u8; 32]) -> Vec<u8> {
    let signing_key = SigningKey::from_bytes(identity_private);
    let verifying_key = signing_key.verifying_key();
    let signature = signing_key.sign(payload);

    let mut out = Vec::with_capacity(32 + 64 + payload.len());
    out.extend_from_slice(verifying_key.as_bytes());
    out.extend_from_slice(&signature.to_bytes());
    out.extend_from_slice(payload);
    out
}

/// Verify a stored signed device identity blob (verifying_key || signature || payload).
/// Returns the inner payload on success.
pub fn verify_signed_identity(signed_blob: &[u8]) -> Result<Vec<u8>> {
    if signed_blob.len() < 32 + 64 {
        return Err(Error::Pairing(PairingError::InvalidDeviceSignature));
    }
    let key_bytes: [u8; 32] = signed_blob[..32]
        .try_into()
        .map_err(|_| Error::Pairing(PairingError::InvalidDeviceSignature))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| Error::Pairing(PairingError::InvalidDeviceSignature))?;
    let sig_bytes: [u8; 64] = signed_blob[32..96]
        .try_into()
        .map_err(|_| Error::Pairing(PairingError::InvalidDeviceSignature))?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    let payload = &signed_blob[96..];
    verifying_key
        .verify_strict(payload, &signature)
        .map_err(|_| Error::Pairing(PairingError::InvalidDeviceSignature))?;
    Ok(payload.to_vec())
}
