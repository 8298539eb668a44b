//! Integration tests for ingest configuration loading

use std::io::Write;

use core_runtime::{Error, IngestConfig, MountMapping};

#[test]
fn test_json_round_trip_through_file() {
    let config = IngestConfig::builder()
        .storage_id("fs-media")
        .root_path("/data")
        .mount_mapping(MountMapping::parse("/Volumes/media:/data").unwrap())
        .max_concurrent(4)
        .resume_log_path("/var/lib/dam-sync/resume.db")
        .build()
        .unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string(&config).unwrap().as_bytes())
        .unwrap();

    let loaded = IngestConfig::from_json_file(file.path()).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_json_without_storage_id_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"{"root_path": "/data"}"#).unwrap();

    let result = IngestConfig::from_json_file(file.path());
    assert!(matches!(result, Err(Error::Config(message)) if message.contains("storage_id")));
}

#[test]
fn test_json_with_invalid_syntax() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{ storage_id: ").unwrap();

    assert!(matches!(
        IngestConfig::from_json_file(file.path()),
        Err(Error::Config(_))
    ));
}
