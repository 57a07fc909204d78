//! Template rendering
//!
//! Placeholders are written `{{ key }}`. A key resolves to the contact field of
//! the same name, `email` and `address` fall back to the contact's address.
//! Unknown keys render as the empty string and are reported, a placeholder
//! that never closes or names nothing is an error.

use std::{borrow::Cow, collections::BTreeSet};

use herald_common::{Address, Contact, Template};

use crate::RenderError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// A message ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub to: Address,
    pub subject: String,
    pub body: String,
}

/// Rendering result, with the placeholder keys that had no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub message: RenderedMessage,
    pub missing: BTreeSet<String>,
}

impl Rendered {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Render `template` for `contact`
///
/// # Errors
///
/// A [`RenderError`] if the subject or body holds a malformed placeholder.
pub fn render(template: &Template, contact: &Contact) -> Result<Rendered, RenderError> {
    render_with(template, contact.address.clone(), |key| {
        contact.field(key).map(Cow::Borrowed).or_else(|| {
            matches!(key, "email" | "address").then(|| Cow::Borrowed(contact.address.as_str()))
        })
    })
}

/// Render `template` for `to`, taking placeholder values from `lookup`
///
/// # Errors
///
/// A [`RenderError`] if the subject or body holds a malformed placeholder.
pub fn render_with<'a, F>(template: &Template, to: Address, lookup: F) -> Result<Rendered, RenderError>
where
    F: Fn(&str) -> Option<Cow<'a, str>>,
{
    let mut missing = BTreeSet::new();
    let subject = substitute(&template.subject, "subject", &lookup, &mut missing)?;
    let body = substitute(&template.body, "body", &lookup, &mut missing)?;

    Ok(Rendered {
        message: RenderedMessage { to, subject, body },
        missing,
    })
}

enum Segment<'t> {
    Text(&'t str),
    Placeholder(&'t str),
}

fn scan<'t>(
    text: &'t str,
    part: &'static str,
    mut emit: impl FnMut(Segment<'t>),
) -> Result<(), RenderError> {
    let mut offset = 0;

    while let Some(start) = text[offset..].find(OPEN) {
        let open = offset + start;
        emit(Segment::Text(&text[offset..open]));

        let inner_start = open + OPEN.len();
        let Some(len) = text[inner_start..].find(CLOSE) else {
            return Err(RenderError::Unterminated { part, offset: open });
        };

        let key = text[inner_start..inner_start + len].trim();
        if key.is_empty() {
            return Err(RenderError::EmptyPlaceholder { part, offset: open });
        }

        emit(Segment::Placeholder(key));
        offset = inner_start + len + CLOSE.len();
    }

    emit(Segment::Text(&text[offset..]));
    Ok(())
}

fn substitute<'a>(
    text: &str,
    part: &'static str,
    lookup: &impl Fn(&str) -> Option<Cow<'a, str>>,
    missing: &mut BTreeSet<String>,
) -> Result<String, RenderError> {
    let mut out = String::with_capacity(text.len());

    scan(text, part, |segment| match segment {
        Segment::Text(text) => out.push_str(text),
        Segment::Placeholder(key) => match lookup(key) {
            Some(value) => out.push_str(&value),
            None => {
                missing.insert(key.to_string());
            }
        },
    })?;

    Ok(out)
}
