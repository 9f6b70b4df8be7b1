//! Repository-diff interface.
//!
//! Reports files added/modified/deleted between a branch and mainline, by
//! shelling out to `git`, in the same synchronous
//! `std::process::Command`-based style the teacher uses for its own git
//! integration. See `SPEC_FULL.md` §6.

use std::path::Path;
use std::process::Command;

use crate::error::{RailyardError, RailyardResult};

/// Name of the branch overlay builds diff against.
pub const MAINLINE_BRANCH: &str = "main";

/// Reports on a worktree's divergence from mainline.
pub struct RepoDiff;

impl RepoDiff {
    /// Files added or modified in `main...HEAD`, relative to `worktree` root.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::RepoError`] if `git` fails or its output is
    /// not valid UTF-8.
    pub fn changed_files(worktree: &Path) -> RailyardResult<Vec<String>> {
        run_diff(worktree, &["AM"])
    }

    /// Files deleted in `main...HEAD`, relative to `worktree` root.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::RepoError`] if `git` fails or its output is
    /// not valid UTF-8.
    pub fn deleted_files(worktree: &Path) -> RailyardResult<Vec<String>> {
        run_diff(worktree, &["D"])
    }

    /// The worktree's current `HEAD` commit SHA.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::RepoError`] if `git` fails.
    pub fn head_commit(worktree: &Path) -> RailyardResult<String> {
        let output = git(worktree, &["rev-parse", "HEAD"])?;
        Ok(output.trim().to_string())
    }

    /// The worktree's current branch name, or `"unknown"` if it cannot be
    /// determined (an accepted best-effort fallback, never an error).
    pub fn branch(worktree: &Path) -> String {
        match git(worktree, &["rev-parse", "--abbrev-ref", "HEAD"]) {
            Ok(out) => {
                let trimmed = out.trim();
                if trimmed.is_empty() {
                    "unknown".to_string()
                } else {
                    trimmed.to_string()
                }
            }
            Err(_) => "unknown".to_string(),
        }
    }
}

/// Run `git diff --name-only --diff-filter=<filters> main...HEAD` and split
/// stdout into a list of repo-relative paths.
fn run_diff(worktree: &Path, filters: &[&str]) -> RailyardResult<Vec<String>> {
    let filter_arg = format!("--diff-filter={}", filters.concat());
    let output = git(
        worktree,
        &[
            "diff",
            "--name-only",
            &filter_arg,
            &format!("{MAINLINE_BRANCH}...HEAD"),
        ],
    )?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn git(worktree: &Path, args: &[&str]) -> RailyardResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(worktree)
        .output()
        .map_err(|e| RailyardError::RepoError {
            message: format!("failed to spawn git: {e}"),
        })?;

    if !output.status.success() {
        return Err(RailyardError::RepoError {
            message: format!(
                "git {:?} exited with {}: {}",
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| RailyardError::RepoError {
        message: format!("git produced non-UTF-8 output: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .status()
                .expect("git available");
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        fs::write(dir.path().join("hello.go"), "package main\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
        dir
    }

    #[test]
    fn branch_falls_back_to_unknown_on_error() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(RepoDiff::branch(dir.path()), "unknown");
    }

    #[test]
    fn head_commit_and_branch_on_fresh_repo() {
        let dir = init_repo();
        let commit = RepoDiff::head_commit(dir.path()).expect("head commit");
        assert_eq!(commit.len(), 40);
        assert_eq!(RepoDiff::branch(dir.path()), "main");
    }

    #[test]
    fn changed_and_deleted_files_detected_on_feature_branch() {
        let dir = init_repo();
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .status()
                .expect("git available");
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["checkout", "-q", "-b", "feature/overlay-test"]);
        fs::write(dir.path().join("hello.go"), "package main\n// changed\n").unwrap();
        fs::write(dir.path().join("handler.go"), "package main\n").unwrap();
        fs::remove_file(dir.path().join("hello.go")).ok();
        fs::write(dir.path().join("hello.go"), "package main\n// changed\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "work"]);

        let changed = RepoDiff::changed_files(dir.path()).expect("changed files");
        assert!(changed.contains(&"hello.go".to_string()));
        assert!(changed.contains(&"handler.go".to_string()));

        let deleted = RepoDiff::deleted_files(dir.path()).expect("deleted files");
        assert!(deleted.is_empty());
    }
}
