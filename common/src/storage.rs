use std::{
    path::{Component, Path, PathBuf},
    time::Duration,
};

use chrono::Utc;
use tokio::fs;
use uuid::Uuid;

use crate::{
    error::{AppError, Res},
    upload::Upload,
};

pub const ALLOWED_EXTENSIONS: [&str; 8] = ["pdf", "doc", "docx", "txt", "png", "jpg", "jpeg", "zip"];

/// Where an upload belongs. Job files live under `job_{id}/`, general message
/// attachments under `temp/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileScope {
    Job(i64),
    Temp,
}

impl FileScope {
    fn dir_name(&self) -> String {
        match self {
            FileScope::Job(id) => format!("job_{}", id),
            FileScope::Temp => "temp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// Inputs sent with a new job.
    Initial,
    /// Inputs a client adds to an existing job.
    Additional,
    /// Deliverables an admin attaches to a job.
    Completed,
    /// Attachments of general messages.
    Message,
}

impl UploadKind {
    fn prefix(&self) -> &'static str {
        match self {
            UploadKind::Initial => "initial",
            UploadKind::Additional => "additional",
            UploadKind::Completed => "completed",
            UploadKind::Message => "msg",
        }
    }
}

/// Disk storage for uploaded files. Paths handed out are relative to the root.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rejects uploads whose extension is not whitelisted. Run before any state is written.
    pub fn check(uploads: &[Upload]) -> Res<()> {
        for upload in uploads {
            let allowed = Path::new(&upload.filename)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if !allowed {
                return Err(AppError::Validation(format!(
                    "File type not allowed for {}",
                    upload.filename
                )));
            }
        }
        Ok(())
    }

    pub async fn save(
        &self,
        scope: FileScope,
        kind: UploadKind,
        uploads: &[Upload],
    ) -> Res<Vec<String>> {
        if uploads.is_empty() {
            return Ok(Vec::new());
        }
        Self::check(uploads)?;

        let dir_name = scope.dir_name();
        let dir = self.root.join(&dir_name);
        fs::create_dir_all(&dir).await?;

        let mut saved = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let name = format!(
                "{}-{}-{}-{}",
                kind.prefix(),
                Utc::now().timestamp_millis(),
                &Uuid::new_v4().simple().to_string()[..8],
                sanitize_filename(&upload.filename)
            );
            if let Err(e) = fs::write(dir.join(&name), &upload.bytes).await {
                self.remove_files(&saved).await;
                return Err(e.into());
            }
            saved.push(format!("{}/{}", dir_name, name));
        }

        log::debug!("Stored {} file(s) under {}", saved.len(), dir_name);
        Ok(saved)
    }

    pub async fn remove_job_dir(&self, job_id: i64) -> Res<()> {
        let dir = self.root.join(FileScope::Job(job_id).dir_name());
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best effort removal of previously stored files.
    pub async fn remove_files(&self, paths: &[String]) {
        for path in paths {
            match self.resolve(path) {
                Ok(full) => {
                    if let Err(e) = fs::remove_file(&full).await {
                        log::warn!("Failed to remove {}: {}", path, e);
                    }
                }
                Err(e) => log::warn!("Refusing to remove {}: {}", path, e),
            }
        }
    }

    /// Maps a stored relative path back onto the root, rejecting traversal.
    pub fn resolve(&self, relative: &str) -> Res<PathBuf> {
        let path = Path::new(relative);
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::Validation(format!("Invalid file path: {}", relative)));
        }
        Ok(self.root.join(path))
    }

    /// Deletes files older than `max_age` one level below the root and drops
    /// directories left empty. Returns the number of files removed. Entries
    /// that cannot be read or removed are logged and skipped.
    pub async fn purge_stale(&self, max_age: Duration) -> Res<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_dir = match entry.file_type().await {
                Ok(kind) => kind.is_dir(),
                Err(e) => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if !is_dir {
                removed += usize::from(remove_if_stale(&path, max_age).await);
                continue;
            }

            let mut files = match fs::read_dir(&path).await {
                Ok(files) => files,
                Err(e) => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            loop {
                match files.next_entry().await {
                    Ok(Some(file)) => {
                        removed += usize::from(remove_if_stale(&file.path(), max_age).await);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Stopped reading {}: {}", path.display(), e);
                        break;
                    }
                }
            }
            // fails while the directory still has files
            let _ = fs::remove_dir(&path).await;
        }

        Ok(removed)
    }
}

async fn remove_if_stale(path: &Path, max_age: Duration) -> bool {
    let stale = match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta
            .modified()
            .map(|modified| modified.elapsed().unwrap_or_default() >= max_age),
        Ok(_) => return false,
        Err(e) => Err(e),
    };
    let outcome = match stale {
        Ok(false) => return false,
        Ok(true) => fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Could not purge {}: {}", path.display(), e);
            false
        }
    }
}
