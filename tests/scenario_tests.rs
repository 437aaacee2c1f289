//! End-to-end scenarios over scripted backends: scan, unlock, select, hash.

mod common;

use layerhash::backend::{Credential, MemoryBackend, MemoryFileSystem, SourceType};
use layerhash::core::abort::AbortSignal;
use layerhash::core::errors::LhError;
use layerhash::hasher::digest::sha256_hex;
use layerhash::hasher::{HashRecord, HasherOptions, RecursiveHasher};
use layerhash::logger::ActivityLog;
use layerhash::output::report::ScanReport;
use layerhash::pathspec::PathSpec;
use layerhash::scanner::{
    CredentialUnlocker, NoUnlock, SelectionPolicy, SourceScanner, StaticCredentials, VolumeScanner,
    VolumeSelection,
};

use common::{LOCKED_IMAGE_PASSWORD, file_system, locked_image, seeded_bytes, snapshot};

fn hash_all(backend: &MemoryBackend, log: &ActivityLog, base_path_specs: &[PathSpec]) -> Vec<HashRecord> {
    let hasher = RecursiveHasher::new(backend, log, HasherOptions::default());
    let mut records = Vec::new();
    hasher
        .process(base_path_specs, &mut records)
        .expect("hashing succeeds");
    records
}

fn display_paths(records: &[HashRecord]) -> Vec<&str> {
    records.iter().map(|r| r.display_path.as_str()).collect()
}

#[test]
fn locked_partition_without_credentials_hashes_only_the_open_one() {
    let image = locked_image();
    let log = ActivityLog::capturing();
    let volumes = VolumeScanner::new(SourceScanner::new(&image.backend, &log), SelectionPolicy::default());

    let (ctx, base_path_specs) = volumes.scan_source(image.source.clone(), &mut NoUnlock).unwrap();
    assert_eq!(base_path_specs, [image.fs1.clone()]);
    assert_eq!(ctx.locked_scan_nodes().count(), 1);
    assert!(
        log.captured()
            .iter()
            .any(|line| line.contains("skipping") && line.contains("locked"))
    );

    let records = hash_all(&image.backend, &log, &base_path_specs);
    assert_eq!(
        display_paths(&records),
        [
            "/p1/boot.ini",
            "/p1/Users/alice/notes.txt",
            "/p1/Users/alice/notes.txt:Zone.Identifier",
        ]
    );
    assert_eq!(
        records[1].digest.as_deref(),
        Some(sha256_hex(&seeded_bytes(1, 4096)).as_str())
    );
}

#[test]
fn configured_password_opens_the_second_partition() {
    let image = locked_image();
    let log = ActivityLog::silent();
    let volumes = VolumeScanner::new(SourceScanner::new(&image.backend, &log), SelectionPolicy::default());
    let mut unlocker = CredentialUnlocker::new(StaticCredentials::new(vec![
        Credential::Password("wrong".to_string()),
        Credential::Password(LOCKED_IMAGE_PASSWORD.to_string()),
    ]));

    let (ctx, base_path_specs) = volumes.scan_source(image.source.clone(), &mut unlocker).unwrap();
    assert!(!ctx.has_locked_nodes());
    assert_eq!(base_path_specs, [image.fs1.clone(), image.fs2.clone()]);
    assert_eq!(image.backend.unlock_attempts(), [image.encrypted.clone(), image.encrypted.clone()]);

    let records = hash_all(&image.backend, &log, &base_path_specs);
    let last = records.last().expect("records");
    assert_eq!(last.display_path, "/p2/secret.bin");
    assert_eq!(last.digest.as_deref(), Some(sha256_hex(&seeded_bytes(2, 1024)).as_str()));
}

#[test]
fn deselected_partition_is_neither_unlocked_nor_hashed() {
    let image = locked_image();
    let log = ActivityLog::silent();
    let policy = SelectionPolicy {
        partitions: VolumeSelection::parse("partition", "1").unwrap(),
        ..SelectionPolicy::default()
    };
    let volumes = VolumeScanner::new(SourceScanner::new(&image.backend, &log), policy);
    let mut unlocker = CredentialUnlocker::new(StaticCredentials::new(vec![Credential::Password(
        LOCKED_IMAGE_PASSWORD.to_string(),
    )]));

    let (_, base_path_specs) = volumes.scan_source(image.source.clone(), &mut unlocker).unwrap();
    assert_eq!(base_path_specs, [image.fs1.clone()]);
    assert!(image.backend.unlock_attempts().is_empty());
}

#[test]
fn out_of_range_partition_is_rejected() {
    let image = locked_image();
    let log = ActivityLog::silent();
    let policy = SelectionPolicy {
        partitions: VolumeSelection::parse("partition", "1,3").unwrap(),
        ..SelectionPolicy::default()
    };
    let volumes = VolumeScanner::new(SourceScanner::new(&image.backend, &log), policy);

    let err = volumes.scan_source(image.source.clone(), &mut NoUnlock).unwrap_err();
    assert!(matches!(
        err,
        LhError::InvalidSelection {
            kind: "partition",
            index: 3,
            available: 2
        }
    ));
    assert!(err.is_fatal());
}

#[test]
fn partition_index_on_image_without_partitions_is_rejected() {
    let source = PathSpec::os("/cases/fs.raw");
    let fs = file_system(&source);
    let backend = MemoryBackend::builder()
        .source(source.clone(), SourceType::StorageMediaImage)
        .layers(&source, [fs.clone()])
        .file_system(&fs, "ext4", MemoryFileSystem::new().file("/etc/hostname", "box\n"))
        .build();
    let log = ActivityLog::silent();
    let policy = SelectionPolicy {
        partitions: VolumeSelection::parse("partition", "3").unwrap(),
        ..SelectionPolicy::default()
    };
    let volumes = VolumeScanner::new(SourceScanner::new(&backend, &log), policy);

    let err = volumes.scan_source(source, &mut NoUnlock).unwrap_err();
    assert!(matches!(
        err,
        LhError::InvalidSelection {
            kind: "partition",
            index: 3,
            available: 0
        }
    ));
    assert!(backend.opened_streams().is_empty());
}

fn snapshot_image() -> (MemoryBackend, PathSpec, Vec<PathSpec>, PathSpec) {
    let source = PathSpec::os("/cases/volume.raw");
    let snapshots: Vec<PathSpec> = (0..4).map(|n| snapshot(&source, n)).collect();
    let live = file_system(&source);

    let mut top_level = snapshots.clone();
    top_level.push(live.clone());
    let mut builder = MemoryBackend::builder()
        .source(source.clone(), SourceType::StorageMediaImage)
        .layers(&source, top_level)
        .file_system(&live, "NTFS", MemoryFileSystem::new().file("/state", "live"));
    let mut snapshot_file_systems = Vec::new();
    for (n, snap) in snapshots.iter().enumerate() {
        let fs = file_system(snap);
        builder = builder.layers(snap, [fs.clone()]).file_system(
            &fs,
            "NTFS",
            MemoryFileSystem::new().file("/state", format!("snapshot {}", n + 1)),
        );
        snapshot_file_systems.push(fs);
    }
    (builder.build(), source, snapshot_file_systems, live)
}

#[test]
fn snapshot_range_replaces_the_live_view() {
    let (backend, source, snapshot_fs, _) = snapshot_image();
    let log = ActivityLog::silent();
    let policy = SelectionPolicy {
        snapshots: VolumeSelection::parse("snapshot", "2..3").unwrap(),
        ..SelectionPolicy::default()
    };
    let volumes = VolumeScanner::new(SourceScanner::new(&backend, &log), policy);

    let (_, base_path_specs) = volumes.scan_source(source, &mut NoUnlock).unwrap();
    assert_eq!(base_path_specs, [snapshot_fs[1].clone(), snapshot_fs[2].clone()]);

    let records = hash_all(&backend, &log, &base_path_specs);
    let digests: Vec<Option<&str>> = records.iter().map(|r| r.digest.as_deref()).collect();
    assert_eq!(
        digests,
        [
            Some(sha256_hex(b"snapshot 2").as_str()),
            Some(sha256_hex(b"snapshot 3").as_str()),
        ]
    );
}

#[test]
fn default_policy_hashes_only_the_live_view() {
    let (backend, source, _, live) = snapshot_image();
    let log = ActivityLog::silent();
    let volumes = VolumeScanner::new(SourceScanner::new(&backend, &log), SelectionPolicy::default());

    let (_, base_path_specs) = volumes.scan_source(source, &mut NoUnlock).unwrap();
    assert_eq!(base_path_specs, [live]);
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let image = locked_image();
    let log = ActivityLog::silent();
    let base = [image.fs1.clone()];

    let sequential = hash_all(&image.backend, &log, &base);
    let options = HasherOptions {
        parallelism: 4,
        read_buffer_size: 64,
        ..HasherOptions::default()
    };
    let mut parallel = Vec::new();
    RecursiveHasher::new(&image.backend, &log, options)
        .process(&base, &mut parallel)
        .unwrap();
    assert_eq!(sequential, parallel);
}

#[test]
fn raised_abort_stops_before_any_record() {
    let image = locked_image();
    let log = ActivityLog::silent();
    let abort = AbortSignal::new();
    abort.raise();

    let mut records: Vec<HashRecord> = Vec::new();
    let err = RecursiveHasher::new(&image.backend, &log, HasherOptions::default())
        .with_abort(abort)
        .process(&[image.fs1.clone()], &mut records)
        .unwrap_err();
    assert!(matches!(err, LhError::UserAbort));
    assert!(records.is_empty());
}

#[test]
fn report_shows_the_locked_layer() {
    let image = locked_image();
    let log = ActivityLog::silent();
    let volumes = VolumeScanner::new(SourceScanner::new(&image.backend, &log), SelectionPolicy::default());
    let (ctx, _) = volumes.scan_source(image.source.clone(), &mut NoUnlock).unwrap();

    let text = ScanReport::from_context(&ctx, Some(&image.backend as &dyn layerhash::backend::StorageBackend))
        .render_text();
    assert!(text.contains("[LOCKED]"), "{text}");
    assert!(text.contains("[NTFS]"), "{text}");
    assert!(text.contains("start offset: 1048576 (0x00100000)"), "{text}");
}
