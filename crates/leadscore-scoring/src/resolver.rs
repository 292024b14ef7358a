//! Cross-sheet contact resolution: ties an event's organization to rows of the contacts table.

use std::sync::LazyLock;

use leadscore_core::{aliases, ContactRecord, EventRecord, FieldAliases, PrimaryContact, RawRow};
use regex::Regex;
use serde::Serialize;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex compiles"));

static PHONE_STRIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-()+]").expect("phone strip regex compiles"));

static PHONE_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{7,}$").expect("phone digits regex compiles"));

static PERSON_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\p{Lu}[\p{L}'.\-]+(?:\s+\p{Lu}[\p{L}'.\-]*)+$").expect("name regex compiles")
});

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value.trim())
}

/// At least seven digits once spaces, dashes, parentheses and `+` are stripped.
pub fn is_valid_phone(value: &str) -> bool {
    let cleaned = PHONE_STRIP_RE.replace_all(value.trim(), "");
    PHONE_DIGITS_RE.is_match(&cleaned)
}

fn looks_like_person_name(value: &str) -> bool {
    !value.contains('@') && PERSON_NAME_RE.is_match(value.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Organization key on the event equals the contact's foreign key. Authoritative.
    OrganizationId,
    OrganizationName,
    /// Older sheets without an organization key link through the series id.
    SeriesId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactMatch<'a> {
    pub contact: &'a ContactRecord,
    /// Position in the contacts table; keeps ordering stable for ties.
    pub index: usize,
    pub kinds: Vec<MatchKind>,
}

impl ContactMatch<'_> {
    pub fn is_key_match(&self) -> bool {
        self.kinds.contains(&MatchKind::OrganizationId)
    }
}

fn trimmed_key(aliases: &FieldAliases, row: &RawRow) -> Option<String> {
    aliases.probe_text(row).map(|v| v.trim().to_string())
}

/// Collect every contact related to `event`, best primary-contact candidate first.
///
/// A contact is related when any of the organization key, organization name or series id
/// matches. Candidates are ordered by valid email, then presence of a title; ties keep
/// table order.
pub fn resolve_contacts<'a>(
    event: &EventRecord,
    contacts: &'a [ContactRecord],
) -> Vec<ContactMatch<'a>> {
    let event_org_id = trimmed_key(&aliases::ORGANIZATION_ID, &event.raw_data);
    let event_series_id = trimmed_key(&aliases::SERIES_ID, &event.raw_data);
    let event_org_name = event.organization_or_name().to_lowercase();

    let mut matches = contacts
        .iter()
        .enumerate()
        .filter_map(|(index, contact)| {
            let mut kinds = Vec::new();

            if let (Some(ours), Some(theirs)) = (
                event_org_id.as_deref(),
                trimmed_key(&aliases::CONTACT_ORGANIZATION_ID, &contact.fields),
            ) {
                if ours == theirs {
                    kinds.push(MatchKind::OrganizationId);
                }
            }

            if let Some(theirs) = contact.text(&aliases::CONTACT_ORGANIZATION_NAME) {
                let theirs = theirs.trim().to_lowercase();
                if names_match(&event_org_name, &theirs) {
                    kinds.push(MatchKind::OrganizationName);
                }
            }

            if let (Some(ours), Some(theirs)) = (
                event_series_id.as_deref(),
                trimmed_key(&aliases::SERIES_ID, &contact.fields),
            ) {
                if ours == theirs {
                    kinds.push(MatchKind::SeriesId);
                }
            }

            (!kinds.is_empty()).then_some(ContactMatch {
                contact,
                index,
                kinds,
            })
        })
        .collect::<Vec<_>>();

    matches.sort_by_key(|m| {
        let extracted = extract_contact(m.contact);
        (
            extracted.email.is_none(),
            extracted.title.is_none(),
            m.index,
        )
    });
    matches
}

/// Shortest run of whole words one organization name may match inside the other.
const MIN_CONTAINED_WORDS: usize = 2;

fn name_words(name: &str) -> Vec<&str> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn names_match(ours: &str, theirs: &str) -> bool {
    if ours.is_empty() || theirs.is_empty() {
        return false;
    }
    if ours == theirs {
        return true;
    }
    let (a, b) = (name_words(ours), name_words(theirs));
    let (inner, outer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    inner.len() >= MIN_CONTAINED_WORDS && outer.windows(inner.len()).any(|w| w == inner.as_slice())
}

/// Pull key-person fields out of a schema-free contact row.
///
/// Normalized headers are tried first, then the alias tables, then a scan of every field
/// for something shaped like an email or a capitalized multi-word name.
pub fn extract_contact(contact: &ContactRecord) -> PrimaryContact {
    let row = &contact.fields;

    let name = aliases::FULL_NAME
        .probe_text(row)
        .or_else(|| {
            let first = aliases::FIRST_NAME.probe_text(row);
            let last = aliases::LAST_NAME.probe_text(row);
            match (first, last) {
                (Some(f), Some(l)) => Some(format!("{f} {l}")),
                (Some(f), None) => Some(f),
                (None, Some(l)) => Some(l),
                (None, None) => None,
            }
        })
        .or_else(|| scan_for_person_name(row));

    let email = aliases::EMAIL
        .probe_map(row, |v| v.as_text().filter(|s| is_valid_email(s)))
        .or_else(|| {
            row.values()
                .filter_map(|v| v.as_text())
                .find(|s| is_valid_email(s))
        });

    let phone = aliases::PHONE.probe_map(row, |v| v.as_text().filter(|s| is_valid_phone(s)));
    let title = aliases::TITLE.probe_text(row);

    PrimaryContact {
        name,
        title,
        email,
        phone,
    }
}

fn scan_for_person_name(row: &RawRow) -> Option<String> {
    let skipped = [
        aliases::CONTACT_ORGANIZATION_NAME,
        aliases::ORGANIZATION_NAME,
        aliases::TITLE,
        aliases::EMAIL,
    ];
    row.iter()
        .filter(|(k, _)| !skipped.iter().any(|a| a.covers(k)))
        .filter_map(|(_, v)| v.as_text())
        .find(|s| looks_like_person_name(s))
}

/// Primary contact for a resolved, already-ordered candidate list.
pub fn primary_contact(matches: &[&ContactRecord]) -> Option<PrimaryContact> {
    matches
        .iter()
        .map(|c| extract_contact(c))
        .find(|p| !p.is_empty())
}
