//! Thin wrappers over the `git` CLI: refs-only remote queries, shallow
//! fetch-and-materialize, and local-checkout commit reads.
//!
//! Grounded on the sibling retrieval-index pack's git-cache module, which
//! shells out to `git rev-parse`/`git log` via `std::process::Command`
//! rather than binding libgit2 — the same choice made here for the baseline
//! cache's remote calls.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Hard deadline for the lightweight refs-only remote query (§5 Timeouts).
pub const REF_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// `git ls-remote <url> <branch>` — resolves a branch to its current commit
/// id without cloning anything. Returns `None` on any failure (no network,
/// unknown branch, git not installed).
pub fn ls_remote_commit(url: &str, branch: &str) -> Option<String> {
    let output = run_with_timeout(
        Command::new("git").args(["ls-remote", url, branch]),
        REF_QUERY_TIMEOUT,
    )?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .map(|s| s.to_string())
}

/// Shallow-clone `url` at `branch` into `dest` (must not already exist).
/// Grounded on the pack's `git log --name-only` streaming-child pattern,
/// here using `git clone --depth 1` since only a file tree is needed.
pub fn shallow_clone(url: &str, branch: &str, dest: &Path) -> std::io::Result<bool> {
    let status = Command::new("git")
        .args([
            "clone",
            "--depth",
            "1",
            "--branch",
            branch,
            "--single-branch",
            url,
        ])
        .arg(dest)
        .status()?;
    Ok(status.success())
}

/// `git rev-parse HEAD` inside an existing local checkout (used for local,
/// non-URL baselines that are themselves version-controlled).
pub fn local_head_commit(repo_path: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Option<std::process::Output> {
    // git CLI calls here are quick refs-only operations; a dedicated thread
    // with a join-timeout is enough to enforce the deadline without pulling
    // in an async process crate for a single blocking call.
    let mut cmd = std::mem::replace(cmd, Command::new("git"));
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let result = cmd.output();
        let _ = tx.send(result);
    });
    rx.recv_timeout(timeout).ok()?.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ls_remote_commit_returns_none_for_bogus_url() {
        let result = ls_remote_commit("file:///nonexistent/repo/path", "main");
        assert!(result.is_none());
    }

    #[test]
    fn local_head_commit_returns_none_outside_a_repo() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(local_head_commit(tmp.path()).is_none());
    }
}
