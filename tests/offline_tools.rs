use keyswap::codec::{DAG_PB_CODEC, RAW_CODEC, multihash_sha2_256};
use keyswap::migration::KeyspaceMigration;
use keyswap::migration::version::write_repo_version;
use keyswap::offline;
use keyswap::store::memory::MemoryStore;
use keyswap::{BinaryKeyCodec, ContentId, Key, KeyCodec};
use std::fs;
use tempfile::tempdir;

fn v1_key(codec: u64, data: &[u8]) -> Key {
    let cid = ContentId::v1(codec, multihash_sha2_256(data)).expect("cid v1");
    Key::new("/blocks").child(&BinaryKeyCodec.cid_to_key(&cid))
}

#[test]
fn inspect_reports_collapses_duplicates_and_bad_lines() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("8-to-9-cids.txt");
    let raw = v1_key(RAW_CODEC, b"shared");
    let pb = v1_key(DAG_PB_CODEC, b"shared");
    let lone = v1_key(RAW_CODEC, b"lone");
    let v0 = Key::new("/blocks")
        .child(&BinaryKeyCodec.cid_to_key(&ContentId::v0(multihash_sha2_256(b"x")).expect("v0")));
    fs::write(
        &path,
        format!("{raw}\n{pb}\n\n{lone}\n{raw}\n/blocks/zz\n{v0}\n"),
    )
    .expect("write log");

    let report = offline::inspect_migration_log(&path, &BinaryKeyCodec).expect("inspect");
    assert_eq!(report.entries, 4);
    assert_eq!(report.distinct_targets, 2);
    assert_eq!(report.duplicate_lines, 1);
    assert_eq!(report.collapse_groups.len(), 1);
    let group = &report.collapse_groups[0];
    assert_eq!(
        group.new_key,
        Key::new("/blocks").child(&BinaryKeyCodec.hash_to_key(&multihash_sha2_256(b"shared")))
    );
    let mut expected_old = vec![raw, pb];
    expected_old.sort();
    assert_eq!(group.old_keys, expected_old);
    let bad: Vec<u64> = report.invalid_lines.iter().map(|l| l.line).collect();
    assert_eq!(bad, vec![6, 7]);
    assert!(!report.ok());
    assert!(!report.reverted);
    assert_eq!(
        report.sha256_hex,
        offline::sha256_file_hex(&path).expect("hash")
    );
    assert_eq!(report.sha256_hex.len(), 64);
}

#[test]
fn planned_swaps_follow_log_order_and_reverted_logs_are_flagged() {
    let repo = tempdir().expect("repo");
    write_repo_version(repo.path(), 8).expect("version");
    let a = v1_key(RAW_CODEC, b"a");
    let b = v1_key(DAG_PB_CODEC, b"b");
    let store = MemoryStore::from_entries([(a.clone(), b"a".to_vec()), (b.clone(), b"b".to_vec())]);
    let migration = KeyspaceMigration::default();

    let applied = migration
        .apply(repo.path(), &store, &BinaryKeyCodec)
        .expect("apply");
    let planned = offline::planned_swaps(&applied.log_path, &BinaryKeyCodec).expect("planned");
    assert_eq!(planned.len(), 2);
    let logged: Vec<String> = fs::read_to_string(&applied.log_path)
        .expect("log")
        .lines()
        .map(str::to_string)
        .collect();
    for (swap, line) in planned.iter().zip(&logged) {
        assert_eq!(swap.old.to_string(), *line);
        assert!(store.snapshot().contains_key(&swap.new));
    }

    let inspected =
        offline::inspect_migration_log(&applied.log_path, &BinaryKeyCodec).expect("inspect");
    assert!(inspected.ok());
    assert!(inspected.collapse_groups.is_empty());

    let reverted = migration
        .revert(repo.path(), &store, &BinaryKeyCodec)
        .expect("revert");
    let consumed =
        offline::inspect_migration_log(&reverted.log_path, &BinaryKeyCodec).expect("inspect");
    assert!(consumed.reverted);
    assert_eq!(consumed.sha256_hex, inspected.sha256_hex);
}

#[test]
fn planned_swaps_stop_at_corrupt_line() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("log.txt");
    fs::write(&path, format!("{}\nnot-hex\n", v1_key(RAW_CODEC, b"ok"))).expect("write");
    let err = offline::planned_swaps(&path, &BinaryKeyCodec).expect_err("corrupt");
    assert_eq!(err.code_str(), "log_corrupt");
}
