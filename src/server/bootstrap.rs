//! Startup helpers for the output directory

use std::path::Path;

use crate::error::Result;

/// Create the output directory if needed and optionally empty it
pub async fn prepare_output_dir(dir: &Path, keep_existing: bool) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    if !keep_existing {
        let removed = clear_directory_contents(dir).await;
        tracing::info!(dir = %dir.display(), removed = removed, "Output directory cleared");
    }
    Ok(())
}

/// Remove every entry inside a directory, keeping the directory itself
///
/// Failures are logged and skipped. Returns the number of entries removed.
pub async fn clear_directory_contents(dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to read output directory");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to list output directory");
                break;
            }
        };

        let path = entry.path();
        let result = match entry.file_type().await {
            Ok(kind) if kind.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove entry");
            }
        }
    }

    removed
}
