//! Atomic file replacement (spec §4.3 atomic-write protocol).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use uuid::Uuid;

const MAX_ATTEMPTS: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Write `contents` to `path` by writing a sibling temp file and renaming it
/// over the target, so a reader never observes a partially written file.
///
/// Retries the whole write-then-rename sequence up to [`MAX_ATTEMPTS`] times
/// with a fixed backoff, then gives up.
///
/// # Errors
///
/// Returns the last I/O error encountered once all attempts are exhausted.
pub async fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = dir.join(format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("ttslo"),
        Uuid::new_v4()
    ));

    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match try_write(&temp_path, path, contents).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::warn!(
                    "atomic write to {} failed (attempt {attempt}/{MAX_ATTEMPTS}): {e}",
                    path.display()
                );
                last_err = Some(e);
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    Err(last_err.expect("loop always sets last_err before exhausting attempts"))
}

async fn try_write(temp_path: &Path, target: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(temp_path, contents)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    tokio::fs::rename(temp_path, target)
        .await
        .with_context(|| format!("renaming {} to {}", temp_path.display(), target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_atomically_creates_target_with_contents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.csv");
        write_atomically(&target, "id,value\n1,2\n").await.unwrap();
        let read_back = tokio::fs::read_to_string(&target).await.unwrap();
        assert_eq!(read_back, "id,value\n1,2\n");
    }

    #[tokio::test]
    async fn write_atomically_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.csv");
        write_atomically(&target, "a\n").await.unwrap();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = vec![];
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["state.csv".to_owned()]);
    }
}
