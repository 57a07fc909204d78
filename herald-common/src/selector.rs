//! Campaign targeting
//!
//! A [`Selector`] is what gets stored with a campaign: a list of raw
//! name/value [`Criterion`]s. Before anything is resolved the selector is
//! compiled into [`Rule`]s, which is where unknown criteria are rejected.
//!
//! | name          | matches when                                   |
//! |---------------|------------------------------------------------|
//! | `all`         | always                                         |
//! | `tag`         | the contact carries the tag (case-insensitive) |
//! | `domain`      | the address domain equals the value            |
//! | `address`     | the address equals the value                   |
//! | `field:<key>` | custom field `<key>` equals the value          |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Address, Contact};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Unknown selector criterion: {0}")]
    UnknownCriterion(String),

    #[error("Criterion {name} has an invalid value {value:?}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

/// One raw targeting criterion, e.g. `tag = "vip"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Criterion {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Which contacts a campaign targets. Every criterion has to match, so an
/// empty selector targets everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(pub Vec<Criterion>);

impl Selector {
    #[must_use]
    pub const fn all() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push(Criterion::new(name, value));
        self
    }

    pub fn criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.0.iter()
    }

    /// Validate every criterion
    ///
    /// # Errors
    ///
    /// Fails on the first criterion with an unknown name or an unusable value.
    pub fn compile(&self) -> Result<Vec<Rule>, SelectorError> {
        self.criteria().map(Rule::parse).collect()
    }

    /// Whether the contact matches every rule
    #[must_use]
    pub fn matches(rules: &[Rule], contact: &Contact) -> bool {
        rules.iter().all(|rule| rule.matches(contact))
    }
}

/// A validated criterion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    All,
    Tag(String),
    Domain(String),
    Address(Address),
    Field { key: String, value: String },
}

impl Rule {
    /// # Errors
    ///
    /// [`SelectorError::UnknownCriterion`] for names outside the table in the
    /// module docs, [`SelectorError::InvalidValue`] when an `address` value does
    /// not parse or a `field:` key is empty.
    pub fn parse(criterion: &Criterion) -> Result<Self, SelectorError> {
        let name = criterion.name.trim();
        let value = criterion.value.trim();

        let invalid = |reason: &str| SelectorError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        match name {
            "all" => Ok(Self::All),
            "tag" => Ok(Self::Tag(value.to_lowercase())),
            "domain" => Ok(Self::Domain(value.to_ascii_lowercase())),
            "address" => Address::parse(value)
                .map(Self::Address)
                .map_err(|e| invalid(&e.to_string())),
            _ => match name.strip_prefix("field:") {
                Some("") => Err(invalid("field key is empty")),
                Some(key) => Ok(Self::Field {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
                None => Err(SelectorError::UnknownCriterion(name.to_string())),
            },
        }
    }

    #[must_use]
    pub fn matches(&self, contact: &Contact) -> bool {
        match self {
            Self::All => true,
            Self::Tag(tag) => contact.has_tag(tag),
            Self::Domain(domain) => contact.address.domain() == domain,
            Self::Address(address) => &contact.address == address,
            Self::Field { key, value } => contact.field(key) == Some(value.as_str()),
        }
    }
}
