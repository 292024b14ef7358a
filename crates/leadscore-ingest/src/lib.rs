//! Import bundle contracts: the handoff from the spreadsheet normalizer into scoring.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use leadscore_core::{aliases, ContactRecord, EditionRecord, EventRecord, NameKey, RawRow};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "leadscore-ingest";

/// One uploaded workbook after normalization. Contacts may live inline or in a sibling file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBundle {
    pub bundle_id: String,
    pub source: String,
    pub imported_at: DateTime<Utc>,
    pub events: Vec<EventRow>,
    #[serde(default)]
    pub contacts: Vec<ContactRecord>,
    #[serde(default)]
    pub contacts_path: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Event row as emitted by the normalizer; editions are still raw sheet rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRow {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub raw_data: RawRow,
    #[serde(default)]
    pub editions: Vec<RawRow>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("contacts file {0} referenced by bundle does not exist")]
    MissingContacts(PathBuf),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct IngestedImport {
    pub bundle_id: Uuid,
    pub source: String,
    pub imported_at: DateTime<Utc>,
    pub events: Vec<EventRecord>,
    pub contacts: Vec<ContactRecord>,
    /// Row positions dropped because no event name could be found.
    pub skipped_rows: Vec<usize>,
    /// Names seen more than once (case-insensitive); rows are kept, scanning takes the first.
    pub duplicate_names: Vec<String>,
}

pub fn load_import_bundle(path: impl AsRef<Path>) -> Result<ImportBundle, IngestError> {
    let path = path.as_ref();
    let mut bundle: ImportBundle = read_json_file(path)?;
    hydrate_contacts(path, &mut bundle)?;
    Ok(bundle)
}

pub fn load_contacts_file(path: impl AsRef<Path>) -> Result<Vec<ContactRecord>> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn hydrate_contacts(bundle_path: &Path, bundle: &mut ImportBundle) -> Result<(), IngestError> {
    let Some(rel_path) = &bundle.contacts_path else {
        return Ok(());
    };
    let contacts_path = bundle_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(rel_path);
    if !contacts_path.exists() {
        return Err(IngestError::MissingContacts(contacts_path));
    }
    let mut contacts = load_contacts_file(&contacts_path)?;
    debug!(
        path = %contacts_path.display(),
        count = contacts.len(),
        "hydrated contacts table"
    );
    bundle.contacts.append(&mut contacts);
    Ok(())
}

pub fn deterministic_bundle_id(bundle: &ImportBundle) -> Uuid {
    let source = format!(
        "{}:{}:{}",
        bundle.source,
        bundle.bundle_id,
        bundle.imported_at.to_rfc3339()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes())
}

/// Build an `EventRecord`, preferring explicit fields over probed raw columns.
pub fn event_from_row(row: &EventRow) -> Option<EventRecord> {
    let name = row
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .or_else(|| aliases::EVENT_NAME.probe_text(&row.raw_data))?;

    let organization_name = row
        .organization_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .or_else(|| aliases::ORGANIZATION_NAME.probe_text(&row.raw_data));

    Some(EventRecord {
        name,
        organization_name,
        raw_data: row.raw_data.clone(),
        editions: row.editions.iter().map(EditionRecord::from_row).collect(),
    })
}

pub fn ingest_bundle(bundle: &ImportBundle) -> IngestedImport {
    let mut events = Vec::with_capacity(bundle.events.len());
    let mut skipped_rows = Vec::new();
    let mut seen = HashSet::new();
    let mut duplicate_names = Vec::new();

    for (index, row) in bundle.events.iter().enumerate() {
        let Some(event) = event_from_row(row) else {
            warn!(row = index, bundle = %bundle.bundle_id, "skipping event row without a name");
            skipped_rows.push(index);
            continue;
        };
        if !seen.insert(NameKey::new(&event.name)) {
            warn!(name = %event.name, "duplicate event name in import; first occurrence wins");
            duplicate_names.push(event.name.clone());
        }
        events.push(event);
    }

    IngestedImport {
        bundle_id: deterministic_bundle_id(bundle),
        source: bundle.source.clone(),
        imported_at: bundle.imported_at,
        events,
        contacts: bundle.contacts.clone(),
        skipped_rows,
        duplicate_names,
    }
}

pub fn load_and_ingest(path: impl AsRef<Path>) -> Result<IngestedImport, IngestError> {
    let bundle = load_import_bundle(path)?;
    Ok(ingest_bundle(&bundle))
}
