use super::payload::AuthPayload;
use crate::types::CookieScope;
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

pub const TOKEN_ALG: &str = "HS256";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: TOKEN_ALG.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signing key")]
    Key,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
}

impl Error {
    /// HTTP status for a failed verification: clock failures are 401, the rest 400.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Expired | Self::NotYetValid => 401,
            _ => 400,
        }
    }
}

/// The two halves of a signed token.
///
/// `content` is `header.payload` and may be exposed to script; `signature`
/// only ever travels in an `HttpOnly` cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitToken {
    pub content: String,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    pub ignore_expiration: bool,
}

impl VerifyOptions {
    #[must_use]
    pub const fn ignoring_expiration() -> Self {
        Self {
            ignore_expiration: true,
        }
    }
}

/// How an auth token should be issued.
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueAuthOptions {
    pub refreshable: bool,
    pub refresh_limit: Option<i64>,
    pub signature_only: bool,
}

/// Signs and verifies HMAC-SHA256 compact tokens.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    secret: SecretString,
    token_age: i64,
    refresh_period: i64,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn split_content(content: &str) -> Result<(&str, &str), Error> {
    let (header_b64, payload_b64) = content.split_once('.').ok_or(Error::TokenFormat)?;
    if header_b64.is_empty() || payload_b64.is_empty() || payload_b64.contains('.') {
        return Err(Error::TokenFormat);
    }
    Ok((header_b64, payload_b64))
}

/// Decode the payload of a token content without checking its signature.
///
/// Only for reading claims the holder already trusts, such as a client reading
/// a token the server just handed it.
///
/// # Errors
/// Returns an error if the content is malformed.
pub fn decode_unverified<T: DeserializeOwned>(content: &str) -> Result<T, Error> {
    let (_, payload_b64) = split_content(content)?;
    b64d_json(payload_b64)
}

/// `refreshLimit` to embed in a new auth token, if any.
///
/// Refreshable tokens get `now + refresh_period` unless a limit is requested;
/// a requested limit is kept only when it outlives the token itself.
#[must_use]
pub fn refresh_limit_for(
    refreshable: bool,
    requested: Option<i64>,
    now: i64,
    token_age: i64,
    refresh_period: i64,
) -> Option<i64> {
    if !refreshable {
        return None;
    }
    match requested {
        None => Some(now + refresh_period),
        Some(limit) if limit > now + token_age => Some(limit),
        Some(_) => None,
    }
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: SecretString, token_age: i64, refresh_period: i64) -> Self {
        Self {
            secret,
            token_age,
            refresh_period,
        }
    }

    #[must_use]
    pub fn token_age(&self) -> i64 {
        self.token_age
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).map_err(|_| Error::Key)
    }

    /// Sign a payload into its content and signature halves.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be encoded.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<SplitToken, Error> {
        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let payload_b64 = b64e_json(payload)?;
        let content = format!("{header_b64}.{payload_b64}");

        let mut mac = self.mac()?;
        mac.update(content.as_bytes());
        let signature = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(SplitToken { content, signature })
    }

    /// Verify a token from its two halves and decode its payload.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the content or signature is malformed,
    /// - the signature does not match,
    /// - `exp` has passed or `nbf` is in the future (unless expiration is ignored).
    pub fn verify<T: DeserializeOwned>(
        &self,
        content: &str,
        signature: &str,
        options: VerifyOptions,
        now: i64,
    ) -> Result<T, Error> {
        let (header_b64, payload_b64) = split_content(content)?;
        if signature.is_empty() || signature.contains('.') {
            return Err(Error::TokenFormat);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != TOKEN_ALG {
            return Err(Error::UnsupportedAlg(header.alg));
        }

        let signature_bytes = Base64UrlUnpadded::decode_vec(signature).map_err(|_| Error::Base64)?;
        let mut mac = self.mac()?;
        mac.update(content.as_bytes());
        mac.verify_slice(&signature_bytes)
            .map_err(|_| Error::InvalidSignature)?;

        let claims: Value = b64d_json(payload_b64)?;
        if !options.ignore_expiration {
            if claims
                .get("exp")
                .and_then(Value::as_i64)
                .is_some_and(|exp| exp <= now)
            {
                return Err(Error::Expired);
            }
            if claims
                .get("nbf")
                .and_then(Value::as_i64)
                .is_some_and(|nbf| nbf > now)
            {
                return Err(Error::NotYetValid);
            }
        }

        Ok(serde_json::from_value(claims)?)
    }

    /// Build the payload of a new auth token.
    #[must_use]
    pub fn auth_payload(
        &self,
        platform: &str,
        data: Value,
        options: &IssueAuthOptions,
        scope: CookieScope,
        now: i64,
    ) -> AuthPayload {
        AuthPayload {
            platform: platform.to_string(),
            data,
            refresh_limit: refresh_limit_for(
                options.refreshable,
                options.refresh_limit,
                now,
                self.token_age,
                self.refresh_period,
            ),
            scope,
            iat: now,
            exp: now + self.token_age,
        }
    }
}
