#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use layerhash::backend::{Credential, MemoryBackend, MemoryFileSystem, MemoryStream, SourceType};
use layerhash::pathspec::{Attributes, LayerKind, PathSpec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_layerhash") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "layerhash.exe" } else { "layerhash" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve layerhash binary path for integration test"),
    }
}

/// Run the binary with `HOME` pointed at `home` so no user config leaks in.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("layerhash-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env("NO_COLOR", "1")
        .env("RUST_BACKTRACE", "1")
        .env_remove("LH_OUTPUT_FORMAT")
        .env_remove("LH_ACTIVITY_LOG")
        .output()
        .expect("execute layerhash command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── fixtures ────────────────────

/// Deterministic pseudo-random content.
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bytes = vec![0u8; len];
    rng.fill(bytes.as_mut_slice());
    bytes
}

/// Write `files` (relative path, content) below `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture dir");
        }
        fs::write(&path, content).expect("write fixture file");
    }
}

pub fn partition(parent: &PathSpec, index: u32, start_offset: u64) -> PathSpec {
    parent.child(
        LayerKind::PartitionTable,
        Attributes::default()
            .with_index(index)
            .with_start_offset(start_offset)
            .with_location(format!("/p{}", index + 1)),
    )
}

pub fn snapshot(parent: &PathSpec, index: u32) -> PathSpec {
    parent.child(
        LayerKind::Snapshot,
        Attributes::default()
            .with_index(index)
            .with_location(format!("/vss{}", index + 1)),
    )
}

pub fn file_system(parent: &PathSpec) -> PathSpec {
    parent.child(LayerKind::FileSystem, Attributes::default().with_location("/"))
}

/// Image with two partitions; the second is BitLocker-style encrypted.
pub struct LockedImage {
    pub source: PathSpec,
    pub p1: PathSpec,
    pub p2: PathSpec,
    pub encrypted: PathSpec,
    pub fs1: PathSpec,
    pub fs2: PathSpec,
    pub backend: MemoryBackend,
}

pub const LOCKED_IMAGE_PASSWORD: &str = "correct horse";

pub fn locked_image() -> LockedImage {
    let source = PathSpec::os("/cases/disk.raw");
    let p1 = partition(&source, 0, 1_048_576);
    let p2 = partition(&source, 1, 105_906_176);
    let encrypted = p2.child(LayerKind::EncryptedVolume, Attributes::default());
    let fs1 = file_system(&p1);
    let fs2 = file_system(&encrypted);

    let backend = MemoryBackend::builder()
        .source(source.clone(), SourceType::StorageMediaImage)
        .layers(&source, [p1.clone(), p2.clone()])
        .layers(&p1, [fs1.clone()])
        .layers(&p2, [encrypted.clone()])
        .encrypted(
            &encrypted,
            Credential::Password(LOCKED_IMAGE_PASSWORD.to_string()),
            fs2.clone(),
        )
        .file_system(
            &fs1,
            "NTFS",
            MemoryFileSystem::new()
                .file("/boot.ini", b"[boot loader]\n")
                .file("/Users/alice/notes.txt", seeded_bytes(1, 4096))
                .stream(
                    "/Users/alice/notes.txt",
                    "Zone.Identifier",
                    MemoryStream::data(b"[ZoneTransfer]\n"),
                ),
        )
        .file_system(
            &fs2,
            "NTFS",
            MemoryFileSystem::new().file("/secret.bin", seeded_bytes(2, 1024)),
        )
        .build();

    LockedImage {
        source,
        p1,
        p2,
        encrypted,
        fs1,
        fs2,
        backend,
    }
}
