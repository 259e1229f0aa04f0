//! Token service: HS256-signed bearer tokens.
//!
//! Tokens are compact JWTs (`header.claims.signature`, each segment base64url
//! without padding). The signature is checked before any claim is decoded,
//! so a forged token never reaches claim parsing.

use crate::models::Role;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

/// Lifetime of a token when none is configured.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::minutes(30);
/// Longest lifetime a token service accepts.
pub const MAX_TOKEN_TTL: Duration = Duration::days(365);

#[derive(Debug, Error)]
pub enum TokenError {
    /// The token is not a well-formed signed token.
    #[error("malformed token")]
    Malformed,
    #[error("token has expired")]
    Expired,
    /// Tampered token or token signed with another key.
    #[error("invalid token signature")]
    SignatureInvalid,
    #[error("signing key must not be empty")]
    InvalidKey,
    #[error("token lifetime must be positive and at most 365 days")]
    InvalidLifetime,
    #[error("failed to encode token: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Identity carried by a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Email of the authenticated user.
    pub sub: String,
    pub role: Role,
    /// Expiry, unix seconds. The token is valid strictly before this instant.
    pub exp: i64,
    pub iat: i64,
}

/// Issues and verifies tokens with a shared symmetric key.
///
/// The key is injected at construction and may be replaced at runtime with
/// [`TokenService::rotate_key`]; every token signed with the old key stops
/// verifying immediately.
#[derive(Debug)]
pub struct TokenService {
    key: RwLock<Vec<u8>>,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Result<Self, TokenError> {
        let key = secret.into();
        if key.is_empty() {
            return Err(TokenError::InvalidKey);
        }
        if !ttl.is_positive() || ttl > MAX_TOKEN_TTL {
            return Err(TokenError::InvalidLifetime);
        }
        Ok(Self {
            key: RwLock::new(key),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn rotate_key(&self, secret: impl Into<Vec<u8>>) -> Result<(), TokenError> {
        let key = secret.into();
        if key.is_empty() {
            return Err(TokenError::InvalidKey);
        }
        *self.key.write().unwrap_or_else(PoisonError::into_inner) = key;
        Ok(())
    }

    pub fn issue(&self, subject: &str, role: Role) -> Result<String, TokenError> {
        self.issue_at(subject, role, OffsetDateTime::now_utc())
    }

    /// Issues a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        subject: &str,
        role: Role,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let expires = now
            .checked_add(self.ttl)
            .ok_or(TokenError::InvalidLifetime)?;
        let claims = Claims {
            sub: subject.to_string(),
            role,
            exp: expires.unix_timestamp(),
            iat: now.unix_timestamp(),
        };

        let message = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );
        let mut mac = self.mac()?;
        mac.update(message.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{message}.{signature}"))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    /// Verifies a token as if the current time were `now`.
    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenError> {
        let mut segments = token.split('.');
        let (Some(header), Some(claims), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed);
        };
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(claims.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::SignatureInvalid)?;

        let header: Header = decode_segment(header)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Malformed);
        }
        let claims: Claims = decode_segment(claims)?;
        if now.unix_timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        let key = self.key.read().unwrap_or_else(PoisonError::into_inner);
        HmacSha256::new_from_slice(&key).map_err(|_| TokenError::InvalidKey)
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
