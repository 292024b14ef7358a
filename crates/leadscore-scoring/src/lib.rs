//! Deterministic multi-criterion opportunity scoring for imported event records.

pub mod quality;
pub mod resolver;

use std::path::Path;

use anyhow::{Context, Result};
use leadscore_core::{
    aliases, format_number, ContactRecord, CriteriaToggles, Criterion, EditionRecord, EventRecord,
    PriorityTier, ScoreResult,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use resolver::{extract_contact, primary_contact, resolve_contacts, ContactMatch, MatchKind};

pub const CRATE_NAME: &str = "leadscore-scoring";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoreError {
    #[error("event record has no name")]
    MissingName,
}

/// Country, city and keyword sets the history and region criteria match against.
///
/// Entries are compared lowercased and trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSets {
    pub vietnam_countries: Vec<String>,
    pub vietnam_cities: Vec<String>,
    pub southeast_asia: Vec<String>,
    pub asia_pacific: Vec<String>,
    pub region_keywords: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for RegionSets {
    fn default() -> Self {
        Self {
            vietnam_countries: owned(&["vietnam", "viet nam", "vn"]),
            vietnam_cities: owned(&[
                "hanoi",
                "ha noi",
                "ho chi minh",
                "saigon",
                "danang",
                "da nang",
            ]),
            southeast_asia: owned(&[
                "vietnam",
                "thailand",
                "singapore",
                "malaysia",
                "indonesia",
                "philippines",
                "myanmar",
                "cambodia",
                "laos",
                "brunei",
            ]),
            asia_pacific: owned(&[
                "china",
                "japan",
                "korea",
                "india",
                "thailand",
                "singapore",
                "malaysia",
                "indonesia",
                "philippines",
                "vietnam",
                "taiwan",
                "hong kong",
                "south korea",
                "north korea",
                "sri lanka",
                "bangladesh",
                "pakistan",
                "myanmar",
                "cambodia",
                "laos",
                "brunei",
            ]),
            region_keywords: owned(&["asean", "asia", "pacific", "apac", "eastern"]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RegionRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(flatten)]
    sets: RegionSets,
}

impl RegionSets {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: RegionRulesFile = serde_yaml::from_str(text).context("parsing region rules")?;
        Ok(file.sets.normalized())
    }

    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("regions.yaml");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    fn normalized(self) -> Self {
        let norm = |items: Vec<String>| {
            items
                .into_iter()
                .map(|s| normalize_place(&s))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            vietnam_countries: norm(self.vietnam_countries),
            vietnam_cities: norm(self.vietnam_cities),
            southeast_asia: norm(self.southeast_asia),
            asia_pacific: norm(self.asia_pacific),
            region_keywords: norm(self.region_keywords),
        }
    }

    fn is_vietnam(&self, country: &str, city: &str) -> bool {
        self.vietnam_countries.iter().any(|c| c == country)
            || (!city.is_empty() && self.vietnam_cities.iter().any(|c| city.contains(c.as_str())))
    }

    fn is_southeast_asia(&self, country: &str) -> bool {
        self.southeast_asia.iter().any(|c| c == country)
    }

    /// Exact match, or containment either way when the contained side has at least
    /// four characters ("south korea" ~ "korea", but "united kingdom" never matches).
    fn is_asia_pacific(&self, country: &str) -> bool {
        if country.is_empty() {
            return false;
        }
        self.asia_pacific.iter().any(|ac| {
            country == ac
                || (ac.len() >= 4 && country.contains(ac.as_str()))
                || (country.len() >= 4 && ac.contains(country))
        })
    }
}

pub fn normalize_place(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryAssessment {
    pub score: u8,
    pub vietnam_events: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContactSignals {
    pub email: bool,
    pub phone: bool,
    pub name: bool,
}

/// Gather email/phone/name presence from the record itself, then from matched contacts.
pub fn contact_signals(event: &EventRecord, contacts: &[&ContactRecord]) -> ContactSignals {
    let raw = &event.raw_data;
    let mut signals = ContactSignals {
        email: aliases::EMAIL
            .probe_map(raw, |v| v.as_text().filter(|s| resolver::is_valid_email(s)))
            .is_some(),
        phone: aliases::PHONE
            .probe_map(raw, |v| v.as_text().filter(|s| resolver::is_valid_phone(s)))
            .is_some(),
        name: aliases::EVENT_CONTACT_NAME.probe_text(raw).is_some(),
    };

    if signals.email && signals.phone && signals.name {
        return signals;
    }
    for contact in contacts {
        let extracted = extract_contact(contact);
        signals.email |= extracted.email.is_some();
        signals.phone |= extracted.phone.is_some();
        signals.name |= extracted.name.is_some();
    }
    signals
}

pub fn contact_score(signals: ContactSignals) -> u8 {
    match signals {
        ContactSignals {
            email: true,
            phone: true,
            ..
        } => 25,
        ContactSignals {
            email: true,
            name: true,
            ..
        } => 20,
        ContactSignals { email: true, .. } => 15,
        ContactSignals { name: true, .. } => 10,
        _ => 0,
    }
}

/// Rounded mean over editions reporting a positive attendance figure.
pub fn average_delegates(editions: &[EditionRecord]) -> Option<u32> {
    let values = editions
        .iter()
        .filter_map(EditionRecord::positive_attendance)
        .collect::<Vec<_>>();
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(mean.round().min(u32::MAX as f64) as u32)
}

/// 200..=800 is the sweet spot; the bands either side earn 20 and 10.
pub fn delegates_score(average: Option<u32>) -> u8 {
    match average {
        Some(200..=800) => 25,
        Some(150..=199) | Some(801..=1000) => 20,
        Some(100..=149) | Some(1001..=1500) => 10,
        _ => 0,
    }
}

/// "2023: Bangkok, Thailand (420 onsite delegates); ... | DISTINCT COUNTRIES: 2 (thailand, japan)"
pub fn format_event_history(editions: &[EditionRecord]) -> String {
    let mut items = Vec::new();
    let mut countries: Vec<String> = Vec::new();

    for edition in editions {
        let location = [edition.city.as_deref(), edition.country.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        if let Some(country) = edition.country.as_deref().map(normalize_place) {
            if !country.is_empty() && !countries.contains(&country) {
                countries.push(country);
            }
        }

        match edition.year.as_deref().map(str::trim).filter(|y| !y.is_empty()) {
            Some(year) => {
                let mut item = year.to_string();
                if !location.is_empty() {
                    item.push_str(&format!(": {location}"));
                }
                if let Some(n) = edition.positive_attendance() {
                    item.push_str(&format!(" ({} onsite delegates)", format_number(n)));
                }
                items.push(item);
            }
            None if !location.is_empty() => items.push(location),
            None => {}
        }
    }

    let history = items.join("; ");
    if countries.is_empty() {
        history
    } else {
        format!(
            "{history} | DISTINCT COUNTRIES: {} ({})",
            countries.len(),
            countries.join(", ")
        )
    }
}

fn distinct_countries(editions: &[EditionRecord]) -> usize {
    let mut seen: Vec<String> = Vec::new();
    for country in editions.iter().filter_map(|e| e.country.as_deref()) {
        let country = normalize_place(country);
        if !country.is_empty() && !seen.contains(&country) {
            seen.push(country);
        }
    }
    seen.len()
}

/// Pure scoring engine. Holds only the injected region sets.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    regions: RegionSets,
}

impl ScoringEngine {
    pub fn new(regions: RegionSets) -> Self {
        Self {
            regions: regions.normalized(),
        }
    }

    pub fn regions(&self) -> &RegionSets {
        &self.regions
    }

    pub fn history(&self, editions: &[EditionRecord]) -> HistoryAssessment {
        let mut vietnam_events = 0;
        let mut southeast_asia = false;
        for edition in editions {
            let country = normalize_place(edition.country.as_deref().unwrap_or_default());
            let city = normalize_place(edition.city.as_deref().unwrap_or_default());
            if self.regions.is_vietnam(&country, &city) {
                vietnam_events += 1;
            } else if self.regions.is_southeast_asia(&country) {
                southeast_asia = true;
            }
        }
        let score = if vietnam_events > 0 {
            25
        } else if southeast_asia {
            15
        } else {
            0
        };
        HistoryAssessment {
            score,
            vietnam_events,
        }
    }

    pub fn region_score(&self, event_name: &str, editions: &[EditionRecord]) -> u8 {
        let name = event_name.to_lowercase();
        if self
            .regions
            .region_keywords
            .iter()
            .any(|k| name.contains(k.as_str()))
        {
            return 25;
        }
        let in_asia_pacific = editions.iter().any(|e| {
            let country = normalize_place(e.country.as_deref().unwrap_or_default());
            self.regions.is_asia_pacific(&country)
        });
        if in_asia_pacific {
            15
        } else {
            0
        }
    }

    /// Score one record against its already-resolved contacts.
    ///
    /// `contacts` is expected in primary-contact order (see [`resolve_contacts`]).
    pub fn score(
        &self,
        event: &EventRecord,
        contacts: &[&ContactRecord],
        toggles: &CriteriaToggles,
    ) -> Result<ScoreResult, ScoreError> {
        if event.name.trim().is_empty() {
            return Err(ScoreError::MissingName);
        }

        let history = self.history(&event.editions);
        let region = self.region_score(&event.name, &event.editions);
        let signals = contact_signals(event, contacts);
        let average = average_delegates(&event.editions);

        let gate = |criterion: Criterion, score: u8| {
            if toggles.is_enabled(criterion) {
                score
            } else {
                0
            }
        };
        let history_score = gate(Criterion::History, history.score);
        let region_score = gate(Criterion::Region, region);
        let contact_score = gate(Criterion::Contact, contact_score(signals));
        let delegates_score = gate(Criterion::Delegates, delegates_score(average));
        let total_score = history_score + region_score + contact_score + delegates_score;

        let primary = primary_contact(contacts);
        let data_issues = quality::detect_data_issues(event, primary.as_ref());
        let data_quality_score =
            quality::data_quality_score(event, primary.as_ref(), &data_issues);

        let scores = SubScores {
            history: history_score,
            region: region_score,
            contact: contact_score,
            delegates: delegates_score,
        };

        Ok(ScoreResult {
            event_name: event.name.trim().to_string(),
            history_score,
            region_score,
            contact_score,
            delegates_score,
            total_score,
            disabled_criteria: toggles.disabled(),
            vietnam_events_count: history.vietnam_events,
            total_events: event.editions.len(),
            average_delegates: average,
            past_events_history_summary: format_event_history(&event.editions),
            primary_contact: primary,
            notes: build_notes(&scores, history.vietnam_events, average, event, toggles),
            problems: build_problems(&scores, signals, average, toggles),
            next_step_strategy: PriorityTier::from_total(total_score),
            data_issues,
            data_quality_score,
        })
    }

    /// Resolve contacts from the full table, then score.
    pub fn score_with_contacts(
        &self,
        event: &EventRecord,
        contacts: &[ContactRecord],
        toggles: &CriteriaToggles,
    ) -> Result<ScoreResult, ScoreError> {
        let matches = resolve_contacts(event, contacts);
        let related = matches.iter().map(|m| m.contact).collect::<Vec<_>>();
        self.score(event, &related, toggles)
    }
}

struct SubScores {
    history: u8,
    region: u8,
    contact: u8,
    delegates: u8,
}

fn build_notes(
    scores: &SubScores,
    vietnam_events: usize,
    average: Option<u32>,
    event: &EventRecord,
    toggles: &CriteriaToggles,
) -> String {
    let mut parts = Vec::new();

    if !toggles.history {
        parts.push("History criterion disabled".to_string());
    } else if scores.history >= 25 {
        parts.push(format!("Has Vietnam events ({vietnam_events})"));
    } else if scores.history >= 15 {
        parts.push("Has Southeast Asia events".to_string());
    }

    if !toggles.region {
        parts.push("Region criterion disabled".to_string());
    } else if scores.region >= 25 {
        parts.push("Regional event (ASEAN/Asia/Pacific)".to_string());
    } else if scores.region >= 15 {
        parts.push("Asian location".to_string());
    }

    match (toggles.contact, scores.contact) {
        (false, _) => parts.push("Contact criterion disabled".to_string()),
        (true, 25) => parts.push("Full contact details (email + phone)".to_string()),
        (true, 20) => parts.push("Email and contact name available".to_string()),
        (true, 15) => parts.push("Email only".to_string()),
        (true, 10) => parts.push("Contact name only".to_string()),
        _ => {}
    }

    let avg = average.unwrap_or_default();
    match (toggles.delegates, scores.delegates) {
        (false, _) => parts.push("Delegates criterion disabled".to_string()),
        (true, 25) => parts.push(format!("Ideal size (avg {avg} delegates)")),
        (true, 20) => parts.push(format!("Acceptable size (avg {avg} delegates)")),
        (true, 10) => parts.push(format!("Marginal size (avg {avg} delegates)")),
        _ => {}
    }

    if toggles.icca_qualification {
        parts.push(format!(
            "ICCA rotation (advisory): {} distinct countries",
            distinct_countries(&event.editions)
        ));
    }

    if parts.is_empty() {
        "Standard event".to_string()
    } else {
        parts.join("; ")
    }
}

fn build_problems(
    scores: &SubScores,
    signals: ContactSignals,
    average: Option<u32>,
    toggles: &CriteriaToggles,
) -> Vec<String> {
    let mut problems = Vec::new();

    if toggles.contact {
        if scores.contact == 0 {
            problems.push("Missing contact information".to_string());
        } else {
            if !signals.phone {
                problems.push("Missing phone number".to_string());
            }
            if !signals.email {
                problems.push("Missing email address".to_string());
            }
        }
    }

    if toggles.delegates && scores.delegates == 0 {
        match average {
            None => problems.push("No delegate count data".to_string()),
            Some(avg) => problems.push(format!("Delegate count outside target range (avg {avg})")),
        }
    }

    if toggles.history && toggles.region && scores.history == 0 && scores.region == 0 {
        problems.push("No Asia/Vietnam history".to_string());
    }

    problems
}
