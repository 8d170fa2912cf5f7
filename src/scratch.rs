//! Scratch space for generated segments.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Allocates unique file names under one directory: `<prefix>-<pid>-<n>.<ext>`.
///
/// The pid keeps two stations sharing a scratch root apart; `n` is never reused
/// within one process.
#[derive(Debug)]
pub struct ScratchDir {
    root: PathBuf,
    prefix: String,
    next: AtomicU64,
}

impl ScratchDir {
    pub fn create(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(ScratchDir {
            root,
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allocate(&self, extension: &str) -> PathBuf {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(
            "{}-{}-{}.{}",
            self.prefix,
            std::process::id(),
            n,
            extension
        ))
    }
}
