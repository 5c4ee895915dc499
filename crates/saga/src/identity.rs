//! Claims-derived signing keys.
//!
//! A bearer token's verification key is not a static secret: it is derived
//! per request from the subject, its roles and its email, keyed by a shared
//! secret. The same claims in any role order produce the same key; anything
//! missing fails closed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Shortest shared secret accepted for key derivation.
pub const MIN_SECRET_LEN: usize = 32;

/// Errors raised while deriving keys or checking signatures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Missing claim: {0}")]
    MissingClaim(&'static str),

    #[error("Claim '{0}' contains a reserved separator")]
    InvalidClaim(&'static str),

    #[error("Shared secret must be at least {MIN_SECRET_LEN} bytes")]
    SecretTooShort,

    #[error("Signature is not valid hex")]
    MalformedSignature,

    #[error("Signature does not match")]
    InvalidSignature,
}

/// The claims a signing key is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub subject: Option<String>,
    pub roles: Vec<String>,
    pub email: Option<String>,
}

impl Claims {
    pub fn new(subject: impl Into<String>, roles: &[&str], email: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            email: Some(email.into()),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// `subject|role-a,role-b|email` with roles sorted and deduplicated.
    fn canonical(&self) -> Result<String, IdentityError> {
        let subject = required(self.subject.as_deref(), "subject")?;
        let email = required(self.email.as_deref(), "email")?;

        let mut roles: Vec<&str> = self
            .roles
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .collect();
        if roles.is_empty() {
            return Err(IdentityError::MissingClaim("role"));
        }
        if roles.iter().any(|r| r.contains([',', '|'])) {
            return Err(IdentityError::InvalidClaim("role"));
        }
        roles.sort_unstable();
        roles.dedup();

        Ok(format!("{subject}|{}|{email}", roles.join(",")))
    }
}

fn required<'a>(value: Option<&'a str>, claim: &'static str) -> Result<&'a str, IdentityError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(IdentityError::MissingClaim(claim))?;
    if value.contains('|') {
        return Err(IdentityError::InvalidClaim(claim));
    }
    Ok(value)
}

/// A key bound to one set of claims.
#[derive(Clone)]
pub struct SigningKey {
    bytes: [u8; 32],
    mac: HmacSha256,
}

impl PartialEq for SigningKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SigningKey {}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

impl SigningKey {
    /// Signs `message`, returning a hex-encoded tag.
    pub fn sign(&self, message: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a hex-encoded tag in constant time.
    pub fn verify(&self, message: &[u8], signature: &str) -> Result<(), IdentityError> {
        let tag = hex::decode(signature).map_err(|_| IdentityError::MalformedSignature)?;
        let mut mac = self.mac.clone();
        mac.update(message);
        mac.verify_slice(&tag)
            .map_err(|_| IdentityError::InvalidSignature)
    }
}

/// Derives the signing key for `claims` from the shared secret.
pub fn derive_signing_key(claims: &Claims, secret: &[u8]) -> Result<SigningKey, IdentityError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(IdentityError::SecretTooShort);
    }

    let canonical = claims.canonical()?;
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| IdentityError::SecretTooShort)?;
    mac.update(canonical.as_bytes());

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&mac.finalize().into_bytes());
    let mac = <HmacSha256 as Mac>::new_from_slice(&bytes)
        .map_err(|_| IdentityError::SecretTooShort)?;

    Ok(SigningKey { bytes, mac })
}
