//! Attachment materializer.
//!
//! Email attachments picked by the user may be temporary files. At schedule
//! time they are copied into a scheduler-owned directory so the job still
//! finds them when it fires, and deleted again once the job is gone.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Owns the durable attachment directory.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True if `path` lives directly inside the storage directory.
    pub fn owns(&self, path: &Path) -> bool {
        let parent = match path.parent() {
            Some(p) => p,
            None => return false,
        };
        if parent == self.dir {
            return true;
        }
        match (parent.canonicalize(), self.dir.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Copy each existing source into storage as `{job_id}_{file_name}`.
    /// Returns the durable paths; sources that cannot be copied are skipped.
    pub fn persist(&self, job_id: &str, sources: &[String]) -> Vec<String> {
        if sources.is_empty() {
            return Vec::new();
        }
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::error!(
                "Cannot create attachment directory {}: {e}",
                self.dir.display()
            );
            return Vec::new();
        }

        let mut used = HashSet::new();
        let mut durable = Vec::with_capacity(sources.len());
        for source in sources {
            let src = Path::new(source);
            if !src.is_file() {
                tracing::warn!("⚠️ Attachment not found, skipping: {source}");
                continue;
            }
            let file_name = match src.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };

            // Already materialized for this job (e.g. on reschedule).
            if self.owns(src) && file_name.starts_with(&format!("{job_id}_")) {
                used.insert(file_name);
                durable.push(source.clone());
                continue;
            }

            let dest_name = unique_name(job_id, &file_name, &used);
            let dest = self.dir.join(&dest_name);
            match std::fs::copy(src, &dest) {
                Ok(_) => {
                    tracing::debug!("📎 Materialized {source} -> {}", dest.display());
                    used.insert(dest_name);
                    durable.push(dest.to_string_lossy().into_owned());
                }
                Err(e) => tracing::error!("Failed to copy attachment {source}: {e}"),
            }
        }
        durable
    }

    /// Delete materialized copies. Returns how many files were removed.
    pub fn cleanup(&self, paths: &[String]) -> usize {
        let mut removed = 0;
        for path in paths {
            let p = Path::new(path);
            if !self.owns(p) {
                tracing::warn!("Refusing to delete attachment outside storage: {path}");
                continue;
            }
            match std::fs::remove_file(p) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to delete attachment {path}: {e}"),
            }
        }
        removed
    }
}

fn unique_name(job_id: &str, file_name: &str, used: &HashSet<String>) -> String {
    let name = format!("{job_id}_{file_name}");
    if !used.contains(&name) {
        return name;
    }
    (1..)
        .map(|n| format!("{job_id}_{n}_{file_name}"))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or(name)
}
