//! Recipient addresses
//!
//! An [`Address`] is always stored in its normalised form: trimmed and
//! lower-cased. Contacts are deduplicated and ordered by this form, so two
//! spellings of the same mailbox can never both be resolved for one campaign.

use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address is empty")]
    Empty,

    #[error("Unable to parse address {0:?}: {1}")]
    Unparseable(String, String),

    #[error("Expected a single mailbox in {0:?}")]
    NotSingleMailbox(String),

    #[error("Address {0:?} is missing a local part or domain")]
    Incomplete(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalise an address
    ///
    /// Accepts either a bare mailbox (`user@example.com`) or a named one
    /// (`User <user@example.com>`); only the mailbox is kept.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] if the input is empty, cannot be parsed, or
    /// does not describe exactly one mailbox with both a local part and domain.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let parsed = mailparse::addrparse(trimmed)
            .map_err(|e| AddressError::Unparseable(trimmed.to_string(), e.to_string()))?;
        let single = parsed
            .extract_single_info()
            .ok_or_else(|| AddressError::NotSingleMailbox(trimmed.to_string()))?;

        let mailbox = single.addr.trim().to_ascii_lowercase();
        match mailbox.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(Self(mailbox)),
            _ => Err(AddressError::Incomplete(trimmed.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the `@`
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, domain)| domain)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Address {
    type Error = AddressError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
