//! Advisory data-quality checks. Nothing here gates scoring.

use leadscore_core::{aliases, DataIssue, EventRecord, IssueSeverity, PrimaryContact};

use crate::resolver::{is_valid_email, is_valid_phone};

#[derive(Debug, Clone, Copy, Default)]
struct Presence {
    email: bool,
    phone: bool,
    person: bool,
    country: bool,
    city: bool,
    website: bool,
}

fn presence(event: &EventRecord, primary: Option<&PrimaryContact>) -> Presence {
    let raw = &event.raw_data;
    let primary = primary.cloned().unwrap_or_default();

    let email = aliases::EMAIL
        .probe_map(raw, |v| v.as_text().filter(|s| is_valid_email(s)))
        .is_some()
        || primary.email.is_some();
    let phone = aliases::PHONE
        .probe_map(raw, |v| v.as_text().filter(|s| is_valid_phone(s)))
        .is_some()
        || primary.phone.is_some();
    let person = aliases::EVENT_CONTACT_NAME
        .probe_map(raw, |v| v.as_text().filter(|s| s.chars().count() >= 2))
        .is_some()
        || primary.name.is_some();

    let country = aliases::COUNTRY.probe_text(raw).is_some()
        || event.editions.iter().any(|e| e.country.is_some());
    let city = aliases::CITY.probe_text(raw).is_some()
        || event.editions.iter().any(|e| e.city.is_some());
    let website = aliases::WEBSITE
        .probe_map(raw, |v| {
            v.as_text()
                .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
        })
        .is_some();

    Presence {
        email,
        phone,
        person,
        country,
        city,
        website,
    }
}

pub fn detect_data_issues(event: &EventRecord, primary: Option<&PrimaryContact>) -> Vec<DataIssue> {
    let p = presence(event, primary);
    let mut issues = Vec::new();

    if event.name.trim().chars().count() < 2 {
        issues.push(DataIssue::new(
            IssueSeverity::Critical,
            "name",
            "Missing or invalid event name",
        ));
    }

    if !p.email && !p.phone && !p.person {
        issues.push(DataIssue::new(
            IssueSeverity::Critical,
            "contact",
            "Missing all contact information (email, phone, contact person)",
        ));
    } else {
        if !p.email {
            issues.push(DataIssue::new(IssueSeverity::Critical, "email", "Missing contact email"));
        }
        if !p.phone {
            issues.push(DataIssue::new(IssueSeverity::Warning, "phone", "Missing contact phone"));
        }
        if !p.person {
            issues.push(DataIssue::new(
                IssueSeverity::Warning,
                "contact_person",
                "Missing contact person name",
            ));
        }
    }

    if !p.country && !p.city {
        issues.push(DataIssue::new(
            IssueSeverity::Critical,
            "location",
            "Missing location information (country, city)",
        ));
    } else {
        if !p.country {
            issues.push(DataIssue::new(IssueSeverity::Warning, "country", "Missing country"));
        }
        if !p.city {
            issues.push(DataIssue::new(IssueSeverity::Warning, "city", "Missing city"));
        }
    }

    if aliases::INDUSTRY.probe_text(&event.raw_data).is_none() {
        issues.push(DataIssue::new(
            IssueSeverity::Warning,
            "industry",
            "Missing or unclear industry",
        ));
    }
    if !p.website {
        issues.push(DataIssue::new(IssueSeverity::Warning, "website", "Missing website URL"));
    }

    if !event.editions.iter().any(|e| e.positive_attendance().is_some()) {
        issues.push(DataIssue::new(
            IssueSeverity::Info,
            "delegates",
            "No delegate count data available",
        ));
    }
    if event.editions.is_empty() {
        issues.push(DataIssue::new(
            IssueSeverity::Info,
            "events",
            "No event history data available",
        ));
    }

    issues
}

/// 100 minus 15/5/2 per critical/warning/info issue, plus completeness bonuses, clamped.
pub fn data_quality_score(
    event: &EventRecord,
    primary: Option<&PrimaryContact>,
    issues: &[DataIssue],
) -> u8 {
    let p = presence(event, primary);
    let mut score: i32 = 100;
    for issue in issues {
        score -= match issue.severity {
            IssueSeverity::Critical => 15,
            IssueSeverity::Warning => 5,
            IssueSeverity::Info => 2,
        };
    }
    if p.email && p.phone && p.person {
        score += 5;
    }
    if p.country && p.city {
        score += 5;
    }
    if p.website {
        score += 3;
    }
    score.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadscore_core::EditionRecord;

    #[test]
    fn bare_record_collects_critical_issues() {
        let event = EventRecord::new("Bare Meeting");
        let issues = detect_data_issues(&event, None);
        let fields = issues.iter().map(|i| i.field.as_str()).collect::<Vec<_>>();
        assert_eq!(
            fields,
            vec!["contact", "location", "industry", "website", "delegates", "events"]
        );
        // 100 - 15 - 15 - 5 - 5 - 2 - 2
        assert_eq!(data_quality_score(&event, None, &issues), 56);
    }

    #[test]
    fn complete_record_earns_bonuses_and_clamps() {
        let event = EventRecord::new("Complete Congress")
            .with_field("Industry", "Medical")
            .with_field("Website", "https://congress.example.org")
            .with_field("keyPersonName", "Linh Pham")
            .with_field("Email", "linh@congress.example.org")
            .with_field("Phone", "+84 236 3958 888")
            .with_edition(EditionRecord {
                year: Some("2023".into()),
                city: Some("Bangkok".into()),
                country: Some("Thailand".into()),
                attendance: Some(420.0),
                ..EditionRecord::default()
            });
        let issues = detect_data_issues(&event, None);
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
        assert_eq!(data_quality_score(&event, None, &issues), 100);
    }

    #[test]
    fn primary_contact_fills_contact_channels() {
        let event = EventRecord::new("Contactless Expo");
        let primary = PrimaryContact {
            name: Some("Hoa Le".into()),
            email: Some("hoa@expo.vn".into()),
            phone: None,
            title: None,
        };
        let issues = detect_data_issues(&event, Some(&primary));
        assert!(issues.iter().any(|i| i.field == "phone"));
        assert!(!issues.iter().any(|i| i.field == "contact" || i.field == "email"));
    }
}
