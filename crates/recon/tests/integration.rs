use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use rusqlite::Connection;

use postindex_recon::dictionary::DictionaryStore;
use postindex_recon::query::{self, ListQuery};
use postindex_recon::{Language, ReclaimPolicy, Reconciler, SyncError, SyncOptions, SyncReport, POST_INFO};

const HEADER: &[&str] = &[
    "Область",
    "Район (старий)",
    "Район (новий)",
    "Населений пункт",
    "Поштовий індекс (Postal code)",
    "Region (Oblast)",
    "District new (Raion new)",
    "Settlement",
    "Поштовий індекс відділення зв`язку (Post code of post office)",
    "Вiддiлення зв`язку",
    "Post office",
];

fn at(day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap().and_hms_opt(3, 0, 0).unwrap()
}

fn office(code: &str, region: &str, settlement: &str) -> Vec<String> {
    let en = |s: &str| postindex_recon::translit::translit(s);
    vec![
        region.to_string(),
        String::new(),
        format!("{region} р-н"),
        settlement.to_string(),
        code.to_string(),
        en(region),
        en(&format!("{region} р-н")),
        en(settlement),
        code.to_string(),
        format!("{settlement} {code}"),
        en(&format!("{settlement} {code}")),
    ]
}

fn source(rows: &[Vec<String>]) -> Vec<Vec<String>> {
    let mut all = vec![HEADER.iter().map(|h| h.to_string()).collect()];
    all.extend(rows.iter().cloned());
    all
}

fn sample() -> Vec<Vec<String>> {
    vec![
        office("01001", "Київська", "Київ"),
        office("79000", "Львівська", "Львів"),
        office("65000", "Одеська", "Одеса"),
        office("07400", "Київська", "Бровари"),
        office("08300", "Київська", "Бориспіль"),
    ]
}

fn sync(conn: &mut Connection, rows: &[Vec<String>], chunk_size: usize, policy: ReclaimPolicy, day: u32) -> SyncReport {
    let options = SyncOptions { chunk_size, reclaim: policy };
    Reconciler::new(&POST_INFO, options)
        .unwrap()
        .run_at(conn, source(rows), at(day))
        .unwrap()
}

fn open() -> Connection {
    Connection::open_in_memory().unwrap()
}

/// Full table contents (without timestamps) with dictionary ids resolved to labels.
fn snapshot(conn: &Connection) -> Vec<String> {
    let page = query::list(
        conn,
        &POST_INFO,
        &ListQuery { limit: 10_000, ..Default::default() },
    )
    .unwrap();
    page.data.iter().map(|r| serde_json::to_string(r).unwrap()).collect()
}

fn keys(conn: &Connection) -> Vec<String> {
    let mut stmt = conn.prepare("SELECT post_office_id FROM post_info ORDER BY post_office_id").unwrap();
    stmt.query_map([], |r| r.get(0)).unwrap().map(Result::unwrap).collect()
}

// -------------------------------------------------------------------------
// Basic runs
// -------------------------------------------------------------------------

#[test]
fn first_run_inserts_everything() {
    let mut conn = open();
    let report = sync(&mut conn, &sample(), 3000, ReclaimPolicy::Unobserved, 1);

    assert_eq!(report.counts.rows_read, 5);
    assert_eq!(report.counts.inserted, 5);
    assert_eq!(report.counts.updated, 0);
    assert_eq!(report.counts.deleted, 0);
    assert_eq!(report.header_row, 1);
    assert_eq!(report.first_data_row, 2);
    assert!(report.unmapped_columns.is_empty());
    assert_eq!(keys(&conn), vec!["01001", "07400", "08300", "65000", "79000"]);
}

#[test]
fn single_row_creates_dictionary_entry_one() {
    let mut conn = open();
    sync(&mut conn, &[office("00001", "Київська", "Kyiv")], 3000, ReclaimPolicy::Unobserved, 1);

    let (settlement, manual, created, updated, checked): (i64, i64, String, String, String) = conn
        .query_row(
            "SELECT settlement_ukr_id, created_manual, created_at, updated_at, checked_at FROM post_info WHERE post_office_id = '00001'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .unwrap();
    assert_eq!(settlement, 1);
    assert_eq!(manual, 0);
    assert_eq!(created, "2026-03-01 03:00:00");
    assert_eq!(updated, created);
    assert_eq!(checked, created);

    let entries = DictionaryStore::load(&conn, "settlement_ukr").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, 1);
    assert_eq!(entries[0].label, "Kyiv");
}

#[test]
fn numeric_codes_are_zero_padded() {
    let mut conn = open();
    sync(&mut conn, &[office("1001", "Київська", "Київ")], 3000, ReclaimPolicy::Unobserved, 1);
    assert_eq!(keys(&conn), vec!["01001"]);

    let postal: String = conn
        .query_row("SELECT postal_code FROM post_info", [], |r| r.get(0))
        .unwrap();
    assert_eq!(postal, "01001");
}

#[test]
fn rows_without_key_are_skipped() {
    let mut conn = open();
    let mut rows = sample();
    rows.insert(2, office("", "Київська", "Нікуди"));
    rows.insert(3, vec![String::new(); HEADER.len()]);

    let report = sync(&mut conn, &rows, 2, ReclaimPolicy::Unobserved, 1);
    assert_eq!(report.counts.rows_read, 6);
    assert_eq!(report.counts.skipped, 1);
    assert_eq!(report.counts.inserted, 5);
}

#[test]
fn unmapped_labels_are_reported() {
    let mut conn = open();
    let rows = vec![
        vec!["Поштовий індекс відділення зв`язку (Post code of post office)".to_string(), "Область".to_string()],
        vec!["11111".to_string(), "Київська".to_string()],
    ];
    let report = Reconciler::new(&POST_INFO, SyncOptions::default())
        .unwrap()
        .run_at(&mut conn, rows, at(1))
        .unwrap();
    assert_eq!(report.counts.inserted, 1);
    assert_eq!(report.unmapped_columns.len(), POST_INFO.fields.len() - 2);
    assert!(report.unmapped_columns.contains(&"Settlement".to_string()));
}

// -------------------------------------------------------------------------
// Properties
// -------------------------------------------------------------------------

#[test]
fn second_run_is_a_no_op() {
    let mut conn = open();
    sync(&mut conn, &sample(), 2, ReclaimPolicy::Unobserved, 1);
    let before = snapshot(&conn);

    let report = sync(&mut conn, &sample(), 2, ReclaimPolicy::Unobserved, 2);
    assert_eq!(report.changes(), 0);
    assert_eq!(report.counts.unchanged, 5);
    assert_eq!(report.dictionary_entries_added, 0);
    assert_eq!(snapshot(&conn), before);

    let updated: String = conn
        .query_row("SELECT updated_at FROM post_info WHERE post_office_id = '79000'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(updated, "2026-03-01 03:00:00");
}

#[test]
fn storage_converges_to_source_keys() {
    let mut conn = open();
    sync(&mut conn, &sample(), 3000, ReclaimPolicy::Unobserved, 1);

    let mut next = sample();
    next.retain(|r| r[8] != "65000");
    next.push(office("03150", "Київська", "Київ"));
    let report = sync(&mut conn, &next, 3000, ReclaimPolicy::Unobserved, 2);

    assert_eq!(report.counts.inserted, 1);
    assert_eq!(report.counts.deleted, 1);
    assert_eq!(keys(&conn), vec!["01001", "03150", "07400", "08300", "79000"]);
}

#[test]
fn only_changed_fields_are_updated() {
    let mut conn = open();
    sync(&mut conn, &sample(), 3000, ReclaimPolicy::Unobserved, 1);

    let mut next = sample();
    next[1][9] = "Львів центр".to_string();
    let report = sync(&mut conn, &next, 3000, ReclaimPolicy::Unobserved, 2);
    assert_eq!(report.counts.updated, 1);
    assert_eq!(report.counts.unchanged, 4);

    let (name, created, updated): (String, String, String) = conn
        .query_row(
            "SELECT post_office_ukr, created_at, updated_at FROM post_info WHERE post_office_id = '79000'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(name, "Львів центр");
    assert_eq!(created, "2026-03-01 03:00:00");
    assert_eq!(updated, "2026-03-02 03:00:00");
}

#[test]
fn dictionary_labels_are_never_duplicated() {
    let mut conn = open();
    sync(&mut conn, &sample(), 1, ReclaimPolicy::Unobserved, 1);
    sync(&mut conn, &sample(), 1, ReclaimPolicy::Unobserved, 2);

    let regions = DictionaryStore::load(&conn, "region_ukr").unwrap();
    let labels: Vec<&str> = regions.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["Київська", "Львівська", "Одеська"]);

    // district_old_ukr column is empty for every row: one empty-label entry
    let old = DictionaryStore::load(&conn, "district_old_ukr").unwrap();
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].label, "");
}

#[test]
fn chunk_size_does_not_change_the_result() {
    let rows = sample();
    let n = rows.len();
    let mut snapshots = Vec::new();
    for chunk in [1, n, n / 2 + 1] {
        let mut conn = open();
        sync(&mut conn, &rows, chunk, ReclaimPolicy::Unobserved, 1);
        snapshots.push(snapshot(&conn));
    }
    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(snapshots[1], snapshots[2]);
}

#[test]
fn repeated_key_first_row_wins() {
    let mut rows = sample();
    rows.push(office("79000", "Львівська", "Винники"));

    for chunk in [1, 3000] {
        let mut conn = open();
        let report = sync(&mut conn, &rows, chunk, ReclaimPolicy::Unobserved, 1);
        assert_eq!(report.counts.duplicates, 1);
        assert_eq!(report.counts.inserted, 5);

        let record = query::get(&conn, &POST_INFO, Language::Ukr, ", ", "79000").unwrap().unwrap();
        assert_eq!(record["settlement_ukr"], "Львів");
    }
}

#[test]
fn repeated_key_across_chunks_is_idempotent() {
    let rows = vec![
        office("00010", "Київська", "Київ"),
        office("00010", "Львівська", "Львів"),
    ];

    for chunk in [1, 2] {
        let mut conn = open();
        sync(&mut conn, &rows, chunk, ReclaimPolicy::Unobserved, 1);
        let before = snapshot(&conn);

        let again = sync(&mut conn, &rows, chunk, ReclaimPolicy::Unobserved, 2);
        assert_eq!(again.changes(), 0, "chunk size {chunk}");
        assert_eq!(again.counts.unchanged, 1);
        assert_eq!(again.counts.duplicates, 1);
        assert_eq!(snapshot(&conn), before);

        // The dropped row's labels are never added
        let regions = DictionaryStore::load(&conn, "region_ukr").unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].label, "Київська");
    }
}

// -------------------------------------------------------------------------
// Storage failures
// -------------------------------------------------------------------------

#[test]
fn failed_chunk_keeps_earlier_chunks_and_rerun_converges() {
    let mut clean = open();
    sync(&mut clean, &sample(), 2, ReclaimPolicy::Unobserved, 1);

    let mut conn = open();
    POST_INFO.ensure_tables(&conn).unwrap();
    // Second chunk holds 65000 and 07400
    conn.execute_batch(
        "CREATE TRIGGER reject_odesa BEFORE INSERT ON post_info \
         WHEN NEW.post_office_id = '65000' \
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
    )
    .unwrap();

    let err = Reconciler::new(&POST_INFO, SyncOptions { chunk_size: 2, reclaim: ReclaimPolicy::Unobserved })
        .unwrap()
        .run_at(&mut conn, source(&sample()), at(1))
        .unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)), "{err}");
    assert_eq!(keys(&conn), vec!["01001", "79000"]);

    conn.execute_batch("DROP TRIGGER reject_odesa").unwrap();
    let report = sync(&mut conn, &sample(), 2, ReclaimPolicy::Unobserved, 2);
    assert_eq!(report.counts.inserted, 3);
    assert_eq!(report.counts.unchanged, 2);
    assert_eq!(keys(&conn), keys(&clean));
    assert_eq!(snapshot(&conn), snapshot(&clean));
}

// -------------------------------------------------------------------------
// Manual rows
// -------------------------------------------------------------------------

fn manual(conn: &Connection, code: &str) {
    POST_INFO.ensure_tables(conn).unwrap();
    let input: BTreeMap<String, String> = [("post_office_id", code), ("settlement_ukr", "Хутір")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    query::insert_manual(conn, &POST_INFO, &input, at(1)).unwrap();
}

#[test]
fn manual_rows_survive_and_reconciled_orphans_go() {
    for policy in [ReclaimPolicy::Unobserved, ReclaimPolicy::Stale] {
        let mut conn = open();
        sync(&mut conn, &[office("88888", "Київська", "Київ")], 3000, policy, 1);
        manual(&conn, "99999");

        let report = sync(&mut conn, &[office("00001", "Київська", "Київ")], 3000, policy, 2);
        assert_eq!(report.counts.deleted, 1, "{policy}");
        assert_eq!(keys(&conn), vec!["00001", "99999"], "{policy}");
    }
}

#[test]
fn empty_source_removes_all_reconciled_rows() {
    let mut conn = open();
    sync(&mut conn, &sample(), 3000, ReclaimPolicy::Unobserved, 1);
    manual(&conn, "99999");

    let report = sync(&mut conn, &[], 3000, ReclaimPolicy::Unobserved, 2);
    assert_eq!(report.counts.deleted, 5);
    assert_eq!(keys(&conn), vec!["99999"]);
}

#[test]
fn source_row_updates_a_manual_row_without_clearing_the_flag() {
    let mut conn = open();
    manual(&conn, "01001");
    let report = sync(&mut conn, &[office("01001", "Київська", "Київ")], 3000, ReclaimPolicy::Unobserved, 2);
    assert_eq!(report.counts.updated, 1);

    let flag: i64 = conn
        .query_row("SELECT created_manual FROM post_info WHERE post_office_id = '01001'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(flag, 1);
}

// -------------------------------------------------------------------------
// Staleness policy
// -------------------------------------------------------------------------

#[test]
fn stale_policy_touches_unchanged_rows() {
    let mut conn = open();
    sync(&mut conn, &sample(), 2, ReclaimPolicy::Stale, 1);
    let report = sync(&mut conn, &sample(), 2, ReclaimPolicy::Stale, 2);
    assert_eq!(report.counts.unchanged, 5);
    assert_eq!(report.counts.deleted, 0);

    let (updated, checked): (String, String) = conn
        .query_row(
            "SELECT updated_at, checked_at FROM post_info WHERE post_office_id = '01001'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(updated, "2026-03-01 03:00:00");
    assert_eq!(checked, "2026-03-02 03:00:00");
}

#[test]
fn stale_policy_removes_never_checked_rows() {
    let mut conn = open();
    sync(&mut conn, &sample(), 3000, ReclaimPolicy::Stale, 1);
    conn.execute("UPDATE post_info SET checked_at = NULL WHERE post_office_id = '65000'", [])
        .unwrap();
    conn.execute(
        "INSERT INTO post_info (post_office_id, created_manual) VALUES ('12345', 0)",
        [],
    )
    .unwrap();

    let mut next = sample();
    next.retain(|r| r[8] != "65000");
    let report = sync(&mut conn, &next, 3000, ReclaimPolicy::Stale, 2);
    assert_eq!(report.counts.deleted, 2);
    assert_eq!(keys(&conn), vec!["01001", "07400", "08300", "79000"]);
}

// -------------------------------------------------------------------------
// Query side over reconciled data
// -------------------------------------------------------------------------

#[test]
fn address_search_over_reconciled_rows() {
    let mut conn = open();
    sync(&mut conn, &sample(), 3000, ReclaimPolicy::Unobserved, 1);

    let page = query::list(
        &conn,
        &POST_INFO,
        &ListQuery { address: Some("Київська".into()), ..Default::default() },
    )
    .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.data[0]["address"], "Київська, Київська р-н, Бориспіль");

    let record = query::get(&conn, &POST_INFO, Language::En, ", ", "65000").unwrap().unwrap();
    assert_eq!(record["address"], "Odeska, Odeska r-n, Odesa");
    assert_eq!(record["post_office_en"], "Odesa 65000");
}

// -------------------------------------------------------------------------
// Chunking transparency over generated sources
// -------------------------------------------------------------------------

fn generated_rows(entries: &[(u16, u8, u8)]) -> Vec<Vec<String>> {
    const REGIONS: &[&str] = &["Київська", "Львівська", "Одеська", "Волинська"];
    const PLACES: &[&str] = &["Ямпіль", "Луцьк", "Гайове", "Згорани", "Знам'янка"];
    entries
        .iter()
        .map(|(code, region, place)| {
            office(
                &format!("{:05}", code),
                REGIONS[*region as usize % REGIONS.len()],
                PLACES[*place as usize % PLACES.len()],
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_chunk_size_converges(
        entries in prop::collection::vec((0u16..200, any::<u8>(), any::<u8>()), 1..40),
        chunk in 1usize..50,
    ) {
        let rows = generated_rows(&entries);

        let mut reference = open();
        sync(&mut reference, &rows, rows.len(), ReclaimPolicy::Unobserved, 1);

        let mut chunked = open();
        sync(&mut chunked, &rows, chunk, ReclaimPolicy::Unobserved, 1);

        prop_assert_eq!(snapshot(&reference), snapshot(&chunked));
        let again = sync(&mut chunked, &rows, chunk, ReclaimPolicy::Unobserved, 2);
        prop_assert_eq!(again.changes(), 0);
    }
}
