//! Authenticated session passed explicitly into every component.
//!
//! Token acquisition and renewal belong to the authentication layer; the
//! notification pipeline only needs to know who the current identity is and
//! whether a credential is present.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

/// Addressable principal that notifications are scoped to (e.g. an email).
///
/// Doubles as the broker topic key, so it is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Parse an identity, rejecting empty or whitespace-only values.
    pub fn parse(value: impl Into<String>) -> Result<Self, NotifyError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(NotifyError::Validation(
                "identity must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = NotifyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Bearer token issued by the authentication layer.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building `Authorization` headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// The identity the pipeline works on, plus the credential (if any) that
/// authorizes REST and broker calls on its behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    identity: Identity,
    credential: Option<Credential>,
}

impl Session {
    pub fn new(identity: Identity, credential: Option<Credential>) -> Self {
        Self {
            identity,
            credential,
        }
    }

    /// Convenience constructor for an authenticated session.
    pub fn authenticated(identity: Identity, token: impl Into<String>) -> Self {
        Self::new(identity, Some(Credential::new(token)))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn has_credential(&self) -> bool {
        self.credential
            .as_ref()
            .is_some_and(|c| !c.expose().trim().is_empty())
    }

    /// Fail fast when no usable credential is present.
    pub fn require_credential(&self) -> Result<&Credential, NotifyError> {
        match &self.credential {
            Some(credential) if !credential.expose().trim().is_empty() => Ok(credential),
            _ => Err(NotifyError::MissingCredential),
        }
    }
}
