//! Storage format test collection from materialized snapshots.

use abicompat_core::fakes::{MemorySnapshots, StaticTestGenerator};
use abicompat_core::{
    collect_storage_tests, diff_storage, RevisionDescriptor, Snapshot, SnapshotProvider,
    StorageError, VersionTag,
};

const HAND_WRITTEN: &str = "tests/suites/test_suite_psa_crypto_storage_format.misc.data";
const GENERATED: &str = "tests/suites/test_suite_psa_crypto_storage_format.current.data";

fn materialize(snapshots: &MemorySnapshots, label: &str) -> Snapshot {
    let mut revision = RevisionDescriptor::new(VersionTag::Old, label).unwrap();
    snapshots.materialize(&mut revision).unwrap()
}

#[test]
fn hand_written_files_contribute_read_tests_only() {
    let snapshots = MemorySnapshots::new()
        .with_file(
            "v1",
            HAND_WRITTEN,
            "Save a key\nkey_storage_write:1\n\nLoad a key\nkey_storage_read:1\n",
        )
        .with_file("v1", "tests/suites/test_suite_psa_crypto.data", "Read\nkey_read:9\n");
    let snapshot = materialize(&snapshots, "v1");

    let tests = collect_storage_tests(&snapshot, &StaticTestGenerator::new()).unwrap();

    assert_eq!(tests.keys().collect::<Vec<_>>(), vec!["key_storage_read:1"]);
    let provenance = &tests["key_storage_read:1"];
    assert_eq!(provenance.file, HAND_WRITTEN);
    assert_eq!(provenance.line_number, 5);
}

#[test]
fn generated_files_are_regenerated_and_kept_whole() {
    let snapshots = MemorySnapshots::new().with_file("v1", GENERATED, "stale\nstale_write:0\n");
    let generator = StaticTestGenerator::new()
        .with_output("v1", GENERATED, "Save\nkey_write:1\n\nLoad\nkey_read:1\n")
        .with_output("v1", "tests/suites/test_suite_psa_crypto_not_supported.generated.data", "x\ny:1\n");
    let snapshot = materialize(&snapshots, "v1");

    let tests = collect_storage_tests(&snapshot, &generator).unwrap();

    assert_eq!(
        tests.keys().collect::<Vec<_>>(),
        vec!["key_read:1", "key_write:1"]
    );
    assert_eq!(
        generator.generated(),
        vec![("v1".to_string(), vec![GENERATED.to_string()])]
    );
}

#[test]
fn generator_failure_is_reported() {
    let snapshots = MemorySnapshots::new();
    let generator = StaticTestGenerator::new().failing("v1");
    let snapshot = materialize(&snapshots, "v1");

    let err = collect_storage_tests(&snapshot, &generator).unwrap_err();
    assert!(matches!(err, StorageError::Generator(_)));
}

#[test]
fn disappearing_generated_case_is_detected() {
    let generator = StaticTestGenerator::new()
        .with_output("v1", GENERATED, "Save\nkey_write:1\n\nSave other\nkey_write:2\n")
        .with_output("v2", GENERATED, "Save\nkey_write:1\n");
    let snapshots = MemorySnapshots::new();

    let old = collect_storage_tests(&materialize(&snapshots, "v1"), &generator).unwrap();
    let new = collect_storage_tests(&materialize(&snapshots, "v2"), &generator).unwrap();
    let diff = diff_storage(&old, &new);

    assert!(!diff.is_compatible());
    assert_eq!(diff.missing.len(), 1);
    assert_eq!(diff.missing[0].0, "key_write:2");
    assert_eq!(diff.missing[0].1.description.as_deref(), Some("Save other"));
}

#[test]
fn duplicate_identity_keeps_the_later_occurrence() {
    let snapshots = MemorySnapshots::new()
        .with_file(
            "v1",
            "tests/suites/test_suite_a_storage_format.data",
            "First\nkey_read:1\n",
        )
        .with_file(
            "v1",
            "tests/suites/test_suite_b_storage_format.data",
            "\nSecond\nkey_read : 1\n",
        );
    let snapshot = materialize(&snapshots, "v1");

    let tests = collect_storage_tests(&snapshot, &StaticTestGenerator::new()).unwrap();

    assert_eq!(tests.len(), 1);
    let provenance = &tests["key_read:1"];
    assert_eq!(provenance.file, "tests/suites/test_suite_b_storage_format.data");
    assert_eq!(provenance.line_number, 3);
}
