use predicates::str::contains;
use std::fs;
use tempfile::tempdir;

#[test]
fn status_reports_empty_ledger() {
    let tmp = tempdir().expect("tempdir");
    let dmr_home = tmp.path().join("dmr");

    assert_cmd::cargo::cargo_bin_cmd!("dmr")
        .current_dir(tmp.path())
        .env("DMR_HOME", &dmr_home)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("ledger is empty"));
}

#[test]
fn status_counts_records_per_target() {
    let tmp = tempdir().expect("tempdir");
    let dmr_home = tmp.path().join("dmr");
    let ledger_dir = dmr_home.join("ledger");
    fs::create_dir_all(&ledger_dir).expect("mkdir ledger");

    let line = concat!(
        "{\"fingerprint\":\"abc123\",\"bvid\":\"BV1xyz\",\"cid\":42,",
        "\"text\":\"前方高能\",\"progress_ms\":12000,\"color\":16777215,",
        "\"font_size\":25,\"state\":\"pending\",\"remote_id\":7,",
        "\"created_at_epoch_secs\":1700000000,\"last_checked_at_epoch_secs\":null}\n",
    );
    fs::write(ledger_dir.join("deliveries.jsonl"), line).expect("seed ledger");

    assert_cmd::cargo::cargo_bin_cmd!("dmr")
        .current_dir(tmp.path())
        .env("DMR_HOME", &dmr_home)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("target bvid=BV1xyz cid=42 pending=1 verified=0 lost=0"))
        .stdout(contains("oldest_pending_since="));
}
