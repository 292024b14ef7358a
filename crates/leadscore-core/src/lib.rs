//! Core domain model for event lead scoring: records, schema-free field probing, score values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "leadscore-core";

/// One spreadsheet cell as it arrived from the import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Trimmed, non-empty text form. Integral numbers render without a fraction.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            CellValue::Number(n) if !n.is_finite() => None,
            CellValue::Number(n) => Some(format_number(*n)),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Null => None,
            CellValue::Number(n) => n.is_finite().then_some(*n),
            CellValue::Text(s) => {
                let cleaned = s.trim().replace(',', "");
                if cleaned.is_empty() {
                    return None;
                }
                cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
            }
        }
    }

    pub fn is_blank(&self) -> bool {
        self.as_text().is_none()
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Original column values keyed by whatever header the source sheet used.
pub type RawRow = BTreeMap<String, CellValue>;

/// Ordered header aliases for one logical field.
///
/// Each alias is tried in order, first as an exact key and then case-insensitively;
/// the first alias holding a usable value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAliases {
    pub field: &'static str,
    pub keys: &'static [&'static str],
}

impl FieldAliases {
    pub const fn new(field: &'static str, keys: &'static [&'static str]) -> Self {
        Self { field, keys }
    }

    pub fn probe_map<T>(&self, row: &RawRow, f: impl Fn(&CellValue) -> Option<T>) -> Option<T> {
        for key in self.keys {
            if let Some(found) = row.get(*key).and_then(&f) {
                return Some(found);
            }
            if let Some(found) = row
                .iter()
                .filter(|(k, _)| k.as_str() != *key && k.eq_ignore_ascii_case(key))
                .find_map(|(_, v)| f(v))
            {
                return Some(found);
            }
        }
        None
    }

    pub fn probe_text(&self, row: &RawRow) -> Option<String> {
        self.probe_map(row, CellValue::as_text)
    }

    pub fn probe_number(&self, row: &RawRow) -> Option<f64> {
        self.probe_map(row, CellValue::as_number)
    }

    /// True when `key` is one of this field's aliases, ignoring ASCII case.
    pub fn covers(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k.eq_ignore_ascii_case(key))
    }
}

/// Alias tables for every logical field the scoring core reads.
pub mod aliases {
    use super::FieldAliases;

    pub const EVENT_NAME: FieldAliases = FieldAliases::new(
        "event_name",
        &[
            "EVENT", "Event Name", "Event", "SeriesName", "SERIESNAME", "Series Name", "Series",
            "SERIES", "Event Series", "name",
        ],
    );

    pub const ORGANIZATION_NAME: FieldAliases = FieldAliases::new(
        "organization_name",
        &[
            "ORGNAME", "OrgName", "Organization Name", "ORGANIZATION_NAME", "Organization",
            "organizationName", "companyName", "Company",
        ],
    );

    /// Organization key on the event (Orgs sheet) side.
    pub const ORGANIZATION_ID: FieldAliases = FieldAliases::new(
        "organization_id",
        &[
            "ID", "Id", "id", "OrgID", "ORGID", "orgId", "ORGANIZATION_ID", "Organization ID",
            "organizationId",
        ],
    );

    /// Foreign key on the contact (Org_Contacts sheet) side.
    pub const CONTACT_ORGANIZATION_ID: FieldAliases = FieldAliases::new(
        "contact_organization_id",
        &[
            "OrgID", "ORGID", "orgId", "OrgId", "ORG_ID", "Organization ID", "ORGANIZATION_ID",
            "organizationId",
        ],
    );

    pub const CONTACT_ORGANIZATION_NAME: FieldAliases = FieldAliases::new(
        "contact_organization_name",
        &[
            "OrgName", "ORGNAME", "Organization", "ORGANIZATION", "Organization Name",
            "ORGANIZATION_NAME", "Company", "companyName",
        ],
    );

    pub const SERIES_ID: FieldAliases = FieldAliases::new(
        "series_id",
        &["SeriesID", "SERIESID", "seriesId", "Series_ID", "SERIES_ID", "Series ID"],
    );

    pub const EMAIL: FieldAliases = FieldAliases::new(
        "email",
        &[
            "Email", "EMAIL", "email", "E-mail", "Email Address", "keyPersonEmail",
            "CONTACT_EMAIL", "Contact Email", "contact_email",
        ],
    );

    pub const PHONE: FieldAliases = FieldAliases::new(
        "phone",
        &[
            "Phone", "PHONE", "phone", "Tel", "TEL", "Telephone", "Mobile", "keyPersonPhone",
            "CONTACT_PHONE", "Contact Phone", "contact_phone",
        ],
    );

    /// Contact-person name as it appears on an event row.
    pub const EVENT_CONTACT_NAME: FieldAliases = FieldAliases::new(
        "event_contact_name",
        &[
            "keyPersonName", "CONTACT_NAME", "Name", "Contact Name", "Contact Person",
            "contactPerson", "contact_name",
        ],
    );

    pub const FULL_NAME: FieldAliases = FieldAliases::new(
        "full_name",
        &[
            "FullName", "Full Name", "FULLNAME", "FULL_NAME", "NAME", "Name", "name",
            "Contact Name", "CONTACT_NAME", "keyPersonName",
        ],
    );

    pub const FIRST_NAME: FieldAliases = FieldAliases::new(
        "first_name",
        &["FirstName", "First Name", "FIRSTNAME", "FIRST_NAME", "first_name", "GivenName"],
    );

    pub const LAST_NAME: FieldAliases = FieldAliases::new(
        "last_name",
        &["LastName", "Last Name", "LASTNAME", "LAST_NAME", "last_name", "Surname", "FamilyName"],
    );

    pub const TITLE: FieldAliases = FieldAliases::new(
        "title",
        &[
            "Title", "TITLE", "title", "Position", "POSITION", "Job Title", "JobTitle",
            "keyPersonTitle", "Role",
        ],
    );

    pub const WEBSITE: FieldAliases = FieldAliases::new(
        "website",
        &["website", "Website", "WEBSITE", "URL", "url", "Web", "web"],
    );

    pub const INDUSTRY: FieldAliases = FieldAliases::new(
        "industry",
        &["industry", "Industry", "INDUSTRY", "Sector", "Category", "Series_Subjects"],
    );

    pub const YEAR: FieldAliases = FieldAliases::new(
        "year",
        &[
            "EDITYEARS", "EditYears", "STARTDATE", "StartDate", "Year", "YEAR", "Event Year",
            "EVENT_YEAR", "Date", "DATE", "EVENT_DATE",
        ],
    );

    pub const CITY: FieldAliases = FieldAliases::new(
        "city",
        &["CITY", "City", "Location City", "LOCATION_CITY", "Venue City", "VENUE_CITY"],
    );

    pub const COUNTRY: FieldAliases = FieldAliases::new(
        "country",
        &[
            "COUNTRY", "Country", "Location Country", "LOCATION_COUNTRY", "Venue Country",
            "VENUE_COUNTRY",
        ],
    );

    pub const ATTENDANCE: FieldAliases = FieldAliases::new(
        "attendance",
        &[
            "TOTATTEND", "TotAttend", "REGATTEND", "RegAttend", "Delegates", "DELEGATES",
            "Attendees", "ATTENDEES", "Attendance", "ATTENDANCE", "numberOfDelegates",
        ],
    );

    pub const CHAIRMAN: FieldAliases =
        FieldAliases::new("chairman", &["Chairman", "CHAIRMAN", "Chair", "President"]);

    pub const SECRETARY: FieldAliases = FieldAliases::new(
        "secretary",
        &["Secretary", "SECRETARY", "Secretary General", "SecretaryGeneral"],
    );
}

/// Case-insensitive record key. Names are compared trimmed and lowercased everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameKey(String);

impl NameKey {
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One historical occurrence of a recurring event series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EditionRecord {
    pub year: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub attendance: Option<f64>,
    pub chairman: Option<String>,
    pub secretary: Option<String>,
}

impl EditionRecord {
    pub fn from_row(row: &RawRow) -> Self {
        Self {
            year: aliases::YEAR.probe_text(row),
            city: aliases::CITY.probe_text(row),
            country: aliases::COUNTRY.probe_text(row),
            attendance: aliases::ATTENDANCE
                .probe_map(row, |v| v.as_number().filter(|n| *n > 0.0)),
            chairman: aliases::CHAIRMAN.probe_text(row),
            secretary: aliases::SECRETARY.probe_text(row),
        }
    }

    /// Attendance when it is a usable positive figure.
    pub fn positive_attendance(&self) -> Option<f64> {
        self.attendance.filter(|n| n.is_finite() && *n > 0.0)
    }
}

/// One candidate opportunity as handed over by the record normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub name: String,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub raw_data: RawRow,
    #[serde(default)]
    pub editions: Vec<EditionRecord>,
}

impl EventRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            organization_name: None,
            raw_data: RawRow::new(),
            editions: Vec::new(),
        }
    }

    pub fn with_organization(mut self, organization_name: impl Into<String>) -> Self {
        self.organization_name = Some(organization_name.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.raw_data.insert(key.into(), value.into());
        self
    }

    pub fn with_edition(mut self, edition: EditionRecord) -> Self {
        self.editions.push(edition);
        self
    }

    pub fn key(&self) -> NameKey {
        NameKey::new(&self.name)
    }

    /// Organization name used for contact matching; falls back to the event name.
    pub fn organization_or_name(&self) -> &str {
        self.organization_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.name.trim())
    }
}

/// One person entry from the separately imported contacts table. Schema-free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ContactRecord {
    pub fields: RawRow,
}

impl ContactRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn text(&self, aliases: &FieldAliases) -> Option<String> {
        aliases.probe_text(&self.fields)
    }
}

/// The four independent scoring criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    History,
    Region,
    Contact,
    Delegates,
}

impl Criterion {
    pub const ALL: [Criterion; 4] = [
        Criterion::History,
        Criterion::Region,
        Criterion::Contact,
        Criterion::Delegates,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Criterion::History => "history",
            Criterion::Region => "region",
            Criterion::Contact => "contact",
            Criterion::Delegates => "delegates",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(input.trim()))
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which criteria contribute to the total. Omitted keys default to enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaToggles {
    pub history: bool,
    pub region: bool,
    pub contact: bool,
    pub delegates: bool,
    /// Advisory only; never filters or changes a score.
    pub icca_qualification: bool,
}

impl Default for CriteriaToggles {
    fn default() -> Self {
        Self {
            history: true,
            region: true,
            contact: true,
            delegates: true,
            icca_qualification: false,
        }
    }
}

impl CriteriaToggles {
    pub fn is_enabled(&self, criterion: Criterion) -> bool {
        match criterion {
            Criterion::History => self.history,
            Criterion::Region => self.region,
            Criterion::Contact => self.contact,
            Criterion::Delegates => self.delegates,
        }
    }

    pub fn set(mut self, criterion: Criterion, enabled: bool) -> Self {
        match criterion {
            Criterion::History => self.history = enabled,
            Criterion::Region => self.region = enabled,
            Criterion::Contact => self.contact = enabled,
            Criterion::Delegates => self.delegates = enabled,
        }
        self
    }

    pub fn disable(self, criterion: Criterion) -> Self {
        self.set(criterion, false)
    }

    pub fn disabled(&self) -> Vec<Criterion> {
        Criterion::ALL
            .into_iter()
            .filter(|c| !self.is_enabled(*c))
            .collect()
    }
}

/// Three-tier next-step label derived from the total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityTier {
    #[serde(rename = "high priority")]
    High,
    #[serde(rename = "medium priority")]
    Medium,
    #[serde(rename = "low priority")]
    Low,
}

impl PriorityTier {
    pub fn from_total(total: u8) -> Self {
        match total {
            50..=u8::MAX => PriorityTier::High,
            30..=49 => PriorityTier::Medium,
            _ => PriorityTier::Low,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PriorityTier::High => "high priority",
            PriorityTier::Medium => "medium priority",
            PriorityTier::Low => "low priority",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Key-person fields taken from the selected primary contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PrimaryContact {
    pub name: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl PrimaryContact {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.title.is_none() && self.email.is_none() && self.phone.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIssue {
    pub severity: IssueSeverity,
    pub field: String,
    pub message: String,
}

impl DataIssue {
    pub fn new(severity: IssueSeverity, field: &str, message: &str) -> Self {
        Self {
            severity,
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Output of one scoring pass. Immutable once built; a later pass supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub event_name: String,
    pub history_score: u8,
    pub region_score: u8,
    pub contact_score: u8,
    pub delegates_score: u8,
    pub total_score: u8,
    pub disabled_criteria: Vec<Criterion>,
    pub vietnam_events_count: usize,
    pub total_events: usize,
    pub average_delegates: Option<u32>,
    pub past_events_history_summary: String,
    pub primary_contact: Option<PrimaryContact>,
    pub notes: String,
    pub problems: Vec<String>,
    pub next_step_strategy: PriorityTier,
    pub data_issues: Vec<DataIssue>,
    pub data_quality_score: u8,
}

impl ScoreResult {
    pub fn sub_score(&self, criterion: Criterion) -> u8 {
        match criterion {
            Criterion::History => self.history_score,
            Criterion::Region => self.region_score,
            Criterion::Contact => self.contact_score,
            Criterion::Delegates => self.delegates_score,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.total_score > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, CellValue)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn integral_numbers_render_as_plain_ids() {
        assert_eq!(CellValue::Number(1234.0).as_text().as_deref(), Some("1234"));
        assert_eq!(CellValue::Number(12.5).as_text().as_deref(), Some("12.5"));
        assert_eq!(CellValue::Text("  ".into()).as_text(), None);
        assert_eq!(CellValue::Text("1,250".into()).as_number(), Some(1250.0));
        assert_eq!(CellValue::Text("n/a".into()).as_number(), None);
    }

    #[test]
    fn probing_follows_alias_order_then_case_folding() {
        let r = row(&[
            ("orgid", CellValue::from("lower")),
            ("ORGID", CellValue::from("upper")),
            ("OrgID", CellValue::from("  ")),
        ]);
        // "OrgID" is blank, so its case-folded siblings are consulted before "ORGID".
        let found = aliases::CONTACT_ORGANIZATION_ID.probe_text(&r);
        assert_eq!(found.as_deref(), Some("upper"));

        let only_folded = row(&[("e-MAIL", CellValue::from("a@b.co"))]);
        assert_eq!(
            aliases::EMAIL.probe_text(&only_folded).as_deref(),
            Some("a@b.co")
        );
    }

    #[test]
    fn bare_name_column_counts_as_event_contact_name() {
        let r = row(&[("Name", CellValue::from("Linh Tran"))]);
        assert_eq!(
            aliases::EVENT_CONTACT_NAME.probe_text(&r).as_deref(),
            Some("Linh Tran")
        );

        let both = row(&[
            ("Contact Name", CellValue::from("Second")),
            ("CONTACT_NAME", CellValue::from("First")),
        ]);
        assert_eq!(
            aliases::EVENT_CONTACT_NAME.probe_text(&both).as_deref(),
            Some("First")
        );
    }

    #[test]
    fn edition_rows_keep_only_positive_attendance() {
        let edition = EditionRecord::from_row(&row(&[
            ("EDITYEARS", CellValue::from(2019i64)),
            ("CITY", CellValue::from("Da Nang")),
            ("COUNTRY", CellValue::from("Vietnam")),
            ("TOTATTEND", CellValue::from(0i64)),
            ("REGATTEND", CellValue::from("450")),
        ]));
        assert_eq!(edition.year.as_deref(), Some("2019"));
        assert_eq!(edition.country.as_deref(), Some("Vietnam"));
        assert_eq!(edition.attendance, Some(450.0));
    }

    #[test]
    fn toggles_default_to_enabled_when_keys_are_missing() {
        let toggles: CriteriaToggles = serde_json::from_str(r#"{"region": false}"#).unwrap();
        assert!(toggles.history && toggles.contact && toggles.delegates);
        assert!(!toggles.region);
        assert!(!toggles.icca_qualification);
        assert_eq!(toggles.disabled(), vec![Criterion::Region]);
    }

    #[test]
    fn tiers_split_at_thirty_and_fifty() {
        assert_eq!(PriorityTier::from_total(50), PriorityTier::High);
        assert_eq!(PriorityTier::from_total(49), PriorityTier::Medium);
        assert_eq!(PriorityTier::from_total(30), PriorityTier::Medium);
        assert_eq!(PriorityTier::from_total(29), PriorityTier::Low);
        assert_eq!(
            serde_json::to_string(&PriorityTier::High).unwrap(),
            "\"high priority\""
        );
    }

    #[test]
    fn name_keys_ignore_case_and_padding() {
        assert_eq!(NameKey::new(" Acme Summit "), NameKey::new("ACME SUMMIT"));
        assert_eq!(
            EventRecord::new("Asia Forum").organization_or_name(),
            "Asia Forum"
        );
    }
}
