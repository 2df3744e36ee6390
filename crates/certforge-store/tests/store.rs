use chrono::{NaiveDate, NaiveDateTime};

use certforge_core::CertificateRecord;
use certforge_store::StreamingStore;

fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .expect("valid timestamp")
}

fn record(
    certificate_id: i64,
    client_id: i64,
    issued: NaiveDateTime,
    expires: NaiveDateTime,
) -> CertificateRecord {
    CertificateRecord {
        certificate_id,
        client_id,
        issued_at: issued,
        expires_at: expires,
    }
}

async fn seeded_store() -> StreamingStore {
    let store = StreamingStore::open_in_memory().await.expect("open store");
    store.reset_schema().await.expect("schema");
    store.insert_clients(3).await.expect("clients");
    let batch = vec![
        // client 1: one active, one expired at the 2024-06-01 cutover
        record(101, 1, at(2023, 1, 15), at(2030, 1, 15)),
        record(102, 1, at(2020, 2, 1), at(2021, 2, 1)),
        // client 2: two active windows
        record(103, 2, at(2022, 5, 1), at(2026, 5, 1)),
        record(104, 2, at(2019, 8, 1), at(2025, 8, 1)),
        // id 102 reused by client 3, still active
        record(102, 3, at(2022, 3, 1), at(2027, 3, 1)),
    ];
    store.write_batch(&batch).await.expect("write batch");
    store
}

#[tokio::test]
async fn write_batch_reports_committed_count() {
    let store = seeded_store().await;
    assert_eq!(store.count_certificates().await.expect("count"), 5);
    assert_eq!(store.count_clients().await.expect("count"), 3);
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let store = StreamingStore::open_in_memory().await.expect("open store");
    store.reset_schema().await.expect("schema");
    assert_eq!(store.write_batch(&[]).await.expect("write"), 0);
}

#[tokio::test]
async fn active_filter_recomputes_against_now() {
    let store = seeded_store().await;
    let now = at(2024, 6, 1);

    let page = store
        .query_active(None, 1, 100, now)
        .await
        .expect("query");
    assert_eq!(page.total_count, 4);
    assert!(page.items.iter().all(|item| item.expires_at > now));

    // a later "now" expires more windows without any write
    let later = at(2026, 6, 1);
    let page = store
        .query_active(None, 1, 100, later)
        .await
        .expect("query");
    assert_eq!(page.total_count, 2);
}

#[tokio::test]
async fn client_filter_narrows_results() {
    let store = seeded_store().await;
    let now = at(2024, 6, 1);

    let page = store
        .query_active(Some(2), 1, 100, now)
        .await
        .expect("query");
    assert_eq!(page.total_count, 2);
    assert!(page.items.iter().all(|item| item.client_id == 2));
}

#[tokio::test]
async fn pagination_is_stable_and_idempotent() {
    let store = seeded_store().await;
    let now = at(2024, 6, 1);

    let first = store.query_active(None, 1, 2, now).await.expect("page 1");
    let second = store.query_active(None, 2, 2, now).await.expect("page 2");
    assert_eq!(first.items.len(), 2);
    assert_eq!(second.items.len(), 2);
    assert!(first.has_next());

    // ordering is (client_id, certificate_id, issued_at)
    let mut seen: Vec<(i64, i64)> = first
        .items
        .iter()
        .chain(&second.items)
        .map(|item| (item.client_id, item.certificate_id))
        .collect();
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);

    // repeated reads return identical pages
    let first_again = store.query_active(None, 1, 2, now).await.expect("page 1");
    assert_eq!(first.items, first_again.items);
    assert_eq!(first.total_count, first_again.total_count);

    seen.dedup();
    assert_eq!(seen.len(), 4, "pages must not overlap");
}

#[tokio::test]
async fn page_beyond_the_end_is_empty() {
    let store = seeded_store().await;
    let page = store
        .query_active(None, 9, 100, at(2024, 6, 1))
        .await
        .expect("query");
    assert!(page.items.is_empty());
    assert_eq!(page.total_count, 4);
    assert!(!page.has_next());
}

#[tokio::test]
async fn reset_schema_destroys_the_previous_dataset() {
    let store = seeded_store().await;
    store.reset_schema().await.expect("reset");
    assert_eq!(store.count_certificates().await.expect("count"), 0);
    assert_eq!(store.count_clients().await.expect("count"), 0);
}

#[tokio::test]
async fn on_disk_store_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("certificates.db");
    {
        let store = StreamingStore::open(&path).await.expect("open");
        store.reset_schema().await.expect("schema");
        store.insert_clients(1).await.expect("clients");
        store
            .write_batch(&[record(1, 1, at(2023, 1, 1), at(2025, 1, 1))])
            .await
            .expect("write");
        store.optimize().await.expect("optimize");
    }
    let reopened = StreamingStore::open_existing(&path)
        .await
        .expect("reopen");
    assert_eq!(reopened.count_certificates().await.expect("count"), 1);
}
