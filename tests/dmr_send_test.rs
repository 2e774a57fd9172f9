use predicates::str::contains;
use std::fs;
use tempfile::tempdir;

#[test]
fn send_requires_session_credentials() {
    let tmp = tempdir().expect("tempdir");
    let dmr_home = tmp.path().join("dmr");
    let candidates = tmp.path().join("candidates.jsonl");
    fs::write(
        &candidates,
        "{\"text\":\"前方高能\",\"progress_ms\":12000,\"color\":16777215,\"font_size\":25}\n",
    )
    .expect("write candidates");

    assert_cmd::cargo::cargo_bin_cmd!("dmr")
        .current_dir(tmp.path())
        .env("DMR_HOME", &dmr_home)
        .env_remove("BILI_SESSDATA")
        .env_remove("BILI_JCT")
        .args(["send", "--bvid", "BV1xyz", "--cid", "42"])
        .arg("--candidates")
        .arg(&candidates)
        .assert()
        .failure()
        .stderr(contains("BILI_SESSDATA"));
}

#[test]
fn send_with_empty_candidate_file_is_a_clean_no_op() {
    let tmp = tempdir().expect("tempdir");
    let dmr_home = tmp.path().join("dmr");
    let candidates = tmp.path().join("candidates.jsonl");
    fs::write(&candidates, "").expect("write candidates");

    assert_cmd::cargo::cargo_bin_cmd!("dmr")
        .current_dir(tmp.path())
        .env("DMR_HOME", &dmr_home)
        .env_remove("BILI_SESSDATA")
        .env_remove("BILI_JCT")
        .args(["send", "--bvid", "BV1xyz", "--cid", "42"])
        .arg("--candidates")
        .arg(&candidates)
        .assert()
        .success()
        .stdout(contains("nothing to send"));
}

#[test]
fn send_rejects_malformed_candidate_rows() {
    let tmp = tempdir().expect("tempdir");
    let dmr_home = tmp.path().join("dmr");
    let candidates = tmp.path().join("candidates.jsonl");
    fs::write(&candidates, "not json\n").expect("write candidates");

    assert_cmd::cargo::cargo_bin_cmd!("dmr")
        .current_dir(tmp.path())
        .env("DMR_HOME", &dmr_home)
        .args(["send", "--bvid", "BV1xyz", "--cid", "42"])
        .arg("--candidates")
        .arg(&candidates)
        .assert()
        .failure()
        .stderr(contains("failed to load"));
}
