use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;

/// Per-process sequence number, combined with the clock to name workspaces
static WORKSPACE_SEQ: AtomicU64 = AtomicU64::new(0);

/// An ephemeral directory owned by exactly one execution
///
/// The directory tree is removed when the workspace is released or dropped,
/// whichever happens first, so every exit path of a pipeline cleans up.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    dir: PathBuf,
    released: bool,
}

impl Workspace {
    /// Creates a fresh, uniquely named directory under `root`
    pub async fn acquire(root: &Path) -> Result<Self> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || Self::create(&root))
            .await
            .context("Workspace creation task failed")?
    }

    fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create workspace root {}", root.display()))?;

        let id = next_execution_id();
        let dir = root.join(&id);
        // `create_dir` rather than `create_dir_all` so a name collision fails loudly
        fs::create_dir(&dir)
            .with_context(|| format!("Failed to create workspace {}", dir.display()))?;

        log::debug!("Acquired workspace {}", dir.display());
        Ok(Self {
            id,
            dir,
            released: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.join(name)
    }

    /// Removes the directory tree, children before parents
    ///
    /// Individual deletion failures are logged and skipped so that siblings
    /// are still cleaned up.
    pub async fn release(mut self) {
        self.released = true;
        let dir = self.dir.clone();
        match tokio::task::spawn_blocking(move || remove_tree(&dir)).await {
            Ok(failures) => log_release(&self.dir, failures),
            Err(e) => log::warn!("Cleanup of workspace {} failed: {e}", self.dir.display()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            log_release(&self.dir, remove_tree(&self.dir));
        }
    }
}

fn log_release(dir: &Path, failures: usize) {
    if failures == 0 {
        log::debug!("Released workspace {}", dir.display());
    } else {
        log::warn!(
            "Released workspace {} with {failures} entries left behind",
            dir.display()
        );
    }
}

fn next_execution_id() -> String {
    let seq = WORKSPACE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "exec-{}-{}-{seq}",
        Utc::now().format("%y%m%d-%H%M%S%.6f"),
        std::process::id()
    )
}

/// Deletes `path` recursively and returns how many entries could not be removed
fn remove_tree(path: &Path) -> usize {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            log::warn!("Unable to stat {}: {e}", path.display());
            return 1;
        }
    };

    if !metadata.is_dir() {
        return match fs::remove_file(path) {
            Ok(()) => 0,
            Err(e) => {
                log::warn!("Unable to remove file {}: {e}", path.display());
                1
            }
        };
    }

    let mut failures = 0;
    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries {
                match entry {
                    Ok(entry) => failures += remove_tree(&entry.path()),
                    Err(e) => {
                        log::warn!("Unable to read entry in {}: {e}", path.display());
                        failures += 1;
                    }
                }
            }
        }
        Err(e) => {
            log::warn!("Unable to list {}: {e}", path.display());
            failures += 1;
        }
    }

    if let Err(e) = fs::remove_dir(path) {
        log::warn!("Unable to remove directory {}: {e}", path.display());
        failures += 1;
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_creates_unique_directories() {
        let root = tempfile::tempdir().unwrap();
        let first = Workspace::acquire(root.path()).await.unwrap();
        let second = Workspace::acquire(root.path()).await.unwrap();

        assert!(first.path().is_dir());
        assert!(second.path().is_dir());
        assert_ne!(first.path(), second.path());
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_acquire_creates_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let workspace = Workspace::acquire(&nested).await.unwrap();
        assert!(workspace.path().starts_with(&nested));
        assert!(workspace.path().is_dir());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_release_removes_nested_tree() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::acquire(root.path()).await.unwrap();
        let dir = workspace.path().to_path_buf();

        fs::create_dir_all(workspace.join("pkg").join("inner")).unwrap();
        fs::write(workspace.join("Main.java"), "class Main {}").unwrap();
        fs::write(workspace.join("pkg").join("inner").join("A.class"), [0u8; 4]).unwrap();

        workspace.release().await;
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let root = tempfile::tempdir().unwrap();
        let dir = {
            let workspace = Workspace::acquire(root.path()).await.unwrap();
            fs::write(workspace.join("main.py"), "print(1)").unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_release_of_vanished_directory_is_quiet() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::acquire(root.path()).await.unwrap();
        fs::remove_dir(workspace.path()).unwrap();
        assert_eq!(remove_tree(workspace.path()), 0);
    }

    #[tokio::test]
    async fn test_acquire_under_a_file_fails() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("plain");
        fs::write(&file, "").unwrap();
        assert!(Workspace::acquire(&file).await.is_err());
    }
}
