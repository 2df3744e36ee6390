use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};

use certforge_core::CertificateRecord;
use certforge_generate::{plan_shards, CertificateSynthesizer, MAX_ACTIVE_PER_CLIENT};

fn reference_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .expect("valid reference time")
}

fn generate_dataset(
    clients: u64,
    certificates: u64,
    workers: usize,
    seed: u64,
) -> Vec<CertificateRecord> {
    let synth = CertificateSynthesizer::new(seed, reference_time());
    let mut records = Vec::new();
    for spec in plan_shards(clients, certificates, workers) {
        records.extend(synth.generate_shard(&spec).expect("generate shard"));
    }
    records
}

#[test]
fn dataset_size_matches_the_request_exactly() {
    for (clients, certificates, workers) in [(1000, 2000, 4), (10, 500, 2), (7, 0, 3), (3, 60, 8)]
    {
        let records = generate_dataset(clients, certificates, workers, 42);
        assert_eq!(
            records.len() as u64,
            certificates,
            "clients={clients} certificates={certificates} workers={workers}"
        );
    }
}

#[test]
fn record_identity_is_unique_across_the_whole_run() {
    let records = generate_dataset(200, 3000, 4, 11);
    let mut identities = HashSet::new();
    for record in &records {
        assert!(
            identities.insert((record.certificate_id, record.issued_at)),
            "duplicate (certificate_id, issued_at) identity"
        );
    }
}

#[test]
fn client_attribution_stays_in_range() {
    let records = generate_dataset(120, 2000, 4, 1);
    let reference = reference_time();
    let mut active: HashMap<i64, u64> = HashMap::new();
    for record in &records {
        assert!((1..=120).contains(&record.client_id));
        if record.is_active_at(reference) {
            *active.entry(record.client_id).or_insert(0) += 1;
        }
    }
    assert!(active.values().all(|&count| count <= MAX_ACTIVE_PER_CLIENT));
}

#[test]
fn runs_with_the_same_inputs_are_identical() {
    let first = generate_dataset(300, 1500, 3, 99);
    let second = generate_dataset(300, 1500, 3, 99);
    assert_eq!(first, second);
}

#[test]
fn different_seeds_diverge() {
    let first = generate_dataset(100, 400, 2, 1);
    let second = generate_dataset(100, 400, 2, 2);
    assert_ne!(first, second);
}

#[test]
fn high_ratio_runs_reuse_ids_without_overlapping_windows() {
    // 500 > 20 x 10, so reuse must activate
    let records = generate_dataset(10, 500, 2, 42);
    assert_eq!(records.len(), 500);

    let mut by_id: HashMap<i64, Vec<&CertificateRecord>> = HashMap::new();
    for record in &records {
        by_id.entry(record.certificate_id).or_default().push(record);
    }
    let reused = by_id.values().filter(|windows| windows.len() > 1).count();
    assert!(reused > 0, "no certificate id was reused");

    for windows in by_id.values_mut() {
        windows.sort_by_key(|record| record.issued_at);
        for pair in windows.windows(2) {
            assert!(pair[0].expires_at <= pair[1].issued_at);
            assert_ne!(pair[0].client_id, pair[1].client_id);
        }
    }
}
