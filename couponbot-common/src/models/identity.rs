// File: couponbot-common/src/models/identity.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

pub const MAX_TOKEN_LEN: usize = 128;

/// Pseudo-anonymous requester token. Not an authenticated identity: a client
/// can drop it or send someone else's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityToken(String);

impl IdentityToken {
    /// 122 random bits from the OS RNG, rendered as 32 hex chars.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidIdentity("empty token".into()));
        }
        if trimmed.len() > MAX_TOKEN_LEN {
            return Err(Error::InvalidIdentity(format!(
                "token longer than {MAX_TOKEN_LEN} characters"
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidIdentity("unexpected character in token".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdentityToken {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IdentityToken::parse(&value)
    }
}

impl From<IdentityToken> for String {
    fn from(token: IdentityToken) -> Self {
        token.0
    }
}
