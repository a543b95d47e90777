//! Password hashing and session cookie signing.

use anyhow::{Result, anyhow};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::Engine;
use hmac::{Hmac, Mac};
use password_hash::{PasswordHash, SaltString};
use sha2::Sha256;
use std::sync::OnceLock;

type HmacSha256 = Hmac<Sha256>;

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

/// Argon2 verification; the digest comparison inside is constant-time.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

/// Burn one argon2 verification so a missing login costs as much as a wrong password.
pub fn verify_dummy(password: &str) {
    let dummy = DUMMY_HASH.get_or_init(|| hash_password("veeta-dummy-password").ok());
    if let Some(phc) = dummy {
        let _ = verify_password(phc, password);
    }
}

fn mac_for(secret: &[u8], value: &str) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).map_err(|e| anyhow!(e.to_string()))?;
    mac.update(value.as_bytes());
    Ok(mac)
}

/// Encode a session id as `s:<id>.<base64url(hmac)>`.
pub fn sign_cookie(secret: &[u8], sid: &str) -> Result<String> {
    let sig = mac_for(secret, sid)?.finalize().into_bytes();
    Ok(format!("s:{}.{}", sid, base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(sig)))
}

/// Return the session id when the signature checks out, `None` otherwise.
pub fn unsign_cookie(secret: &[u8], value: &str) -> Option<String> {
    let body = value.strip_prefix("s:")?;
    let (sid, sig) = body.rsplit_once('.')?;
    if sid.is_empty() { return None; }
    let sig = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(sig).ok()?;
    mac_for(secret, sid).ok()?.verify_slice(&sig).ok()?;
    Some(sid.to_string())
}
