//! Manifest gate and replica integrity scenarios.

mod common;

use std::fs;

use posdb::database::{FormatADatabase, FormatBDatabase};
use posdb::error::PosDbError;
use posdb::ingest::IngestSource;
use posdb::key::Tier;
use posdb::Config;

use common::{list_files_recursive, write_pgn};

#[test]
fn opening_format_b_database_as_format_a_reports_key_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    FormatBDatabase::open(dir.path(), Config::default()).unwrap();

    let err = FormatADatabase::open(dir.path(), Config::default()).unwrap_err();
    assert!(matches!(err, PosDbError::ManifestKeyMismatch { .. }), "got {err:?}");
}

#[test]
fn flipped_endianness_signature_byte_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    FormatADatabase::open(dir.path(), Config::default()).unwrap();

    let manifest_path = dir.path().join("manifest");
    let mut bytes = fs::read(&manifest_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&manifest_path, bytes).unwrap();

    let err = FormatADatabase::open(dir.path(), Config::default()).unwrap_err();
    assert!(matches!(err, PosDbError::ManifestEndiannessMismatch(_)), "got {err:?}");
}

#[test]
fn truncated_manifest_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    FormatADatabase::open(dir.path(), Config::default()).unwrap();

    fs::write(dir.path().join("manifest"), []).unwrap();

    let err = FormatADatabase::open(dir.path(), Config::default()).unwrap_err();
    assert!(matches!(err, PosDbError::InvalidManifest(_)), "got {err:?}");
}

#[test]
fn replica_is_byte_identical_to_source_after_merge() {
    let dir = tempfile::tempdir().unwrap();
    let db = FormatADatabase::open(dir.path(), Config::default()).unwrap();

    let pgn = "[Event \"A\"]\n[Result \"1-0\"]\n\n1. e4 e5 2. Nf3 Nc6 1-0\n";
    let path = write_pgn(dir.path(), "g.pgn", pgn);
    db.import(&[IngestSource { path, tier: Tier::Human }], false).unwrap();
    db.merge_all(|_, _| {}).unwrap();
    db.flush().unwrap();

    let dest = tempfile::tempdir().unwrap();
    db.replicate_merge_all(dest.path(), |_, _| {}).unwrap();

    let source_files = list_files_recursive(dir.path());
    let dest_files = list_files_recursive(dest.path());
    assert_eq!(source_files, dest_files, "replica should contain exactly the same relative paths");

    for rel in &source_files {
        let source_bytes = fs::read(dir.path().join(rel)).unwrap();
        let dest_bytes = fs::read(dest.path().join(rel)).unwrap();
        assert_eq!(source_bytes, dest_bytes, "{rel:?} should be byte-identical between source and replica");
    }
}
