//! Recipient resolution
//!
//! Turns a campaign selector into the list of contacts that will be attempted:
//! subscribed only, one entry per address, ordered by address so reruns
//! and reports are deterministic.

use std::sync::Arc;

use ahash::AHashSet;
use herald_common::{Address, Contact, Selector, internal};
use herald_store::ContactStore;

use crate::ResolutionError;

/// Resolved recipients, ordered by address
///
/// Cloning is cheap and every clone iterates the same contacts from the start.
#[derive(Debug, Clone, Default)]
pub struct Recipients {
    contacts: Arc<[Contact]>,
}

impl Recipients {
    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.contacts.iter().map(|contact| &contact.address)
    }

    /// The subset whose addresses are in `addresses`, order preserved
    #[must_use]
    pub fn only(&self, addresses: &AHashSet<Address>) -> Self {
        self.contacts
            .iter()
            .filter(|contact| addresses.contains(&contact.address))
            .cloned()
            .collect()
    }
}

impl FromIterator<Contact> for Recipients {
    fn from_iter<T: IntoIterator<Item = Contact>>(iter: T) -> Self {
        let mut seen = AHashSet::new();
        let mut contacts: Vec<Contact> = iter
            .into_iter()
            .filter(Contact::is_subscribed)
            .filter(|contact| seen.insert(contact.address.clone()))
            .collect();
        contacts.sort_by(|a, b| a.address.cmp(&b.address));

        Self {
            contacts: contacts.into(),
        }
    }
}

impl<'a> IntoIterator for &'a Recipients {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.iter()
    }
}

/// Resolve `selector` against `store`
///
/// The selector is validated before the store is consulted, and whatever the
/// store returns is filtered again so a store that over-matches cannot widen
/// the audience.
///
/// # Errors
///
/// [`ResolutionError::Selector`] for unknown criteria or malformed values,
/// [`ResolutionError::Store`] if the contact store cannot be read.
pub async fn resolve(
    store: &dyn ContactStore,
    selector: &Selector,
) -> Result<Recipients, ResolutionError> {
    let rules = selector.compile()?;
    let candidates = store.resolve(selector).await?;
    let found = candidates.len();

    let recipients: Recipients = candidates
        .into_iter()
        .filter(|contact| Selector::matches(&rules, contact))
        .collect();

    internal!(
        level = DEBUG,
        "Resolved {} recipients from {} candidates",
        recipients.len(),
        found
    );

    Ok(recipients)
}
