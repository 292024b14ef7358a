use std::path::PathBuf;

use leadscore_ingest::{load_and_ingest, load_import_bundle};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sample-import/bundle.json")
}

#[test]
fn sample_import_hydrates_contacts_from_sibling_file() {
    let bundle = load_import_bundle(fixture()).expect("bundle loads");
    assert_eq!(bundle.events.len(), 5);
    assert_eq!(bundle.contacts.len(), 4);
}

#[test]
fn sample_import_normalizes_names_and_editions() {
    let ingested = load_and_ingest(fixture()).expect("bundle ingests");
    assert_eq!(ingested.events.len(), 4);
    assert_eq!(ingested.skipped_rows, vec![4]);
    assert!(ingested.duplicate_names.is_empty());

    let rice = &ingested.events[2];
    assert_eq!(rice.name, "International Symposium on Rice Genetics");
    assert_eq!(rice.editions.len(), 2);
    assert_eq!(rice.editions[0].country.as_deref(), Some("Philippines"));
    assert_eq!(rice.editions[0].attendance, Some(180.0));

    let radiology = &ingested.events[0];
    assert_eq!(radiology.editions[2].attendance, Some(540.0));
}
