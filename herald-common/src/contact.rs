//! Contacts, as handed to the dispatcher by the contact store

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::Address;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscription {
    #[default]
    Subscribed,
    Unsubscribed,
}

/// A single entry in the contact list
///
/// The dispatcher only ever reads contacts. Custom fields are kept in a
/// `BTreeMap` so iteration order is stable by field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub address: Address,

    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub subscription: Subscription,
}

impl Contact {
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            fields: BTreeMap::new(),
            tags: BTreeSet::new(),
            subscription: Subscription::Subscribed,
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Add tags from a comma separated list, e.g. `"vip, newsletter"`
    ///
    /// Empty entries are skipped and tags are stored lower-cased.
    #[must_use]
    pub fn with_tags(mut self, tags: &str) -> Self {
        self.tags.extend(
            tags.split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_lowercase),
        );
        self
    }

    #[must_use]
    pub const fn unsubscribed(mut self) -> Self {
        self.subscription = Subscription::Unsubscribed;
        self
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription == Subscription::Subscribed
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag.trim()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn address(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn tags_are_split_and_lowercased() {
        let contact = Contact::new(address("a@x")).with_tags(" VIP, ,newsletter ");
        assert_eq!(
            contact.tags.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["newsletter", "vip"]
        );
        assert!(contact.has_tag("Vip"));
        assert!(!contact.has_tag("other"));
    }

    #[test]
    fn fields_iterate_in_name_order() {
        let contact = Contact::new(address("a@x"))
            .with_field("surname", "Smith")
            .with_field("name", "Alice");
        let keys: Vec<_> = contact.fields.keys().cloned().collect();
        assert_eq!(keys, vec!["name".to_string(), "surname".to_string()]);
        assert_eq!(contact.field("name"), Some("Alice"));
        assert_eq!(contact.field("missing"), None);
    }

    #[test]
    fn subscription_defaults_to_subscribed() {
        let contact: Contact = serde_json::from_str(r#"{"address":"A@X"}"#).unwrap();
        assert!(contact.is_subscribed());
        assert!(!contact.unsubscribed().is_subscribed());
    }
}
