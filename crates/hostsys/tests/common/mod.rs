//! Shared helpers for integration tests
//!
//! Paths that end the process (contract violations, escalated faults,
//! `System::abort`) run in a child: the test binary re-executes itself
//! with `--exact <test>` and `HOSTSYS_TEST_CHILD=<test>`, and the parent
//! inspects how the child died.

#![allow(dead_code)]

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const CHILD_ENV: &str = "HOSTSYS_TEST_CHILD";

/// Whether this process is the child spawned for `test`
pub fn is_child(test: &str) -> bool {
    std::env::var(CHILD_ENV).map_or(false, |v| v == test)
}

/// Run `test` in a child process; returns the signal that killed it
pub fn run_child(test: &str, envs: &[(&str, &Path)]) -> Option<i32> {
    let exe = std::env::current_exe().unwrap();
    let status = Command::new(exe)
        .args([test, "--exact", "--test-threads=1", "--nocapture"])
        .env(CHILD_ENV, test)
        .env_remove("HOSTSYS_CRASH_DUMP_DIR")
        .envs(envs.iter().map(|(k, v)| (*k, v.as_os_str())))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    status.signal()
}

/// Fresh, empty directory under the system temp dir
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hostsys-it-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Snapshot files written into `dir`
pub fn dump_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
            name.starts_with("crash-") && name.ends_with(".dump")
        })
        .collect();
    files.sort();
    files
}
