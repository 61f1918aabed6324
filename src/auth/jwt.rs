//! JWT Token Service
//! Issue access/refresh token pairs and validate them in one of two modes.

use crate::auth::models::{TokenClaims, UserRole};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;
pub const DEFAULT_ISSUER: &str = "xcloud";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("{0}")]
    Invalid(String),
    #[error("token has expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// How much of a token `decode` checks beyond its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Signature, algorithm, `exp`, `nbf` and issuer.
    Strict,
    /// Signature and algorithm only. Reserved for the refresh flow, which
    /// checks expiry itself.
    SignatureOnly,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Signs and verifies HS256 tokens with one secret for the process lifetime.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl TokenService {
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn issue_token_pair(
        &self,
        subject: &Uuid,
        username: &str,
        role: UserRole,
    ) -> Result<TokenPair, TokenError> {
        self.issue_token_pair_at(Utc::now(), subject, username, role)
    }

    /// Same as [`issue_token_pair`](Self::issue_token_pair) with an explicit clock.
    pub fn issue_token_pair_at(
        &self,
        now: DateTime<Utc>,
        subject: &Uuid,
        username: &str,
        role: UserRole,
    ) -> Result<TokenPair, TokenError> {
        let access = self.claims_at(now, ACCESS_TOKEN_TTL_SECS, subject, username, role);
        let refresh = self.claims_at(now, REFRESH_TOKEN_TTL_SECS, subject, username, role);

        debug!(
            user_id = %subject,
            username,
            role = %role,
            "Issuing token pair"
        );

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            expires_in: ACCESS_TOKEN_TTL_SECS,
        })
    }

    fn claims_at(
        &self,
        now: DateTime<Utc>,
        ttl_secs: i64,
        subject: &Uuid,
        username: &str,
        role: UserRole,
    ) -> TokenClaims {
        let issued_at = now.timestamp();
        TokenClaims {
            sub: subject.to_string(),
            username: username.to_string(),
            role,
            iat: issued_at,
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
            nbf: issued_at,
            iss: self.issuer.clone(),
        }
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Strict validation for access tokens.
    pub fn validate_token(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.decode(token, ValidationMode::Strict)
    }

    /// Signature-only parsing: time-based claims are not checked.
    pub fn parse_token_unchecked(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.decode(token, ValidationMode::SignatureOnly)
    }

    pub fn decode(&self, token: &str, mode: ValidationMode) -> Result<TokenClaims, TokenError> {
        let validation = self.validation(mode);
        let decoded = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => {
                    TokenError::Invalid("signature is invalid".to_string())
                }
                ErrorKind::InvalidAlgorithm => {
                    TokenError::Invalid("unexpected signing method".to_string())
                }
                ErrorKind::ImmatureSignature => {
                    TokenError::Invalid("token is not valid yet".to_string())
                }
                ErrorKind::InvalidIssuer => TokenError::Invalid("issuer is invalid".to_string()),
                _ => TokenError::Invalid(format!("token is malformed: {e}")),
            },
        )?;

        debug!(
            username = %decoded.claims.username,
            mode = ?mode,
            "Decoded JWT"
        );

        Ok(decoded.claims)
    }

    fn validation(&self, mode: ValidationMode) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        match mode {
            ValidationMode::Strict => {
                validation.validate_nbf = true;
                validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
                validation.set_issuer(&[self.issuer.as_str()]);
            }
            ValidationMode::SignatureOnly => {
                validation.validate_exp = false;
                validation.validate_nbf = false;
                validation.required_spec_claims.clear();
            }
        }
        validation
    }
}
