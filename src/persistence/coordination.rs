//! Editor-coordination handshake (spec §4.3, §8 S4).
//!
//! Two sentinel files beside the config path let an external editor safely
//! acquire exclusive OS-level access to the live config file while the
//! daemon backs off. The daemon never blocks; it just refuses writes for the
//! duration and signals quiescence.

use std::path::{Path, PathBuf};

use anyhow::Result;

/// Tracks whether the daemon has ceded write access to an external editor.
#[derive(Debug)]
pub struct CoordinationHandshake {
    wants_lock_path: PathBuf,
    idle_path: PathBuf,
    active: bool,
}

impl CoordinationHandshake {
    /// Derive the two sentinel paths from the config file's path (spec §6).
    #[must_use]
    pub fn for_config_path(config_path: &Path) -> Self {
        let wants_lock_path = sibling(config_path, "editor_wants_lock");
        let idle_path = sibling(config_path, "service_idle");
        Self { wants_lock_path, idle_path, active: false }
    }

    /// True while coordination is active: callers must refuse config/state/log writes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Call once per tick, before any write. Transitions the handshake state
    /// and creates/removes `service_idle` as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if creating or removing the sentinel file fails.
    pub async fn poll(&mut self) -> Result<()> {
        let wants_lock = tokio::fs::metadata(&self.wants_lock_path).await.is_ok();

        if wants_lock && !self.active {
            self.active = true;
            tokio::fs::write(&self.idle_path, b"").await?;
            log::info!("editor coordination engaged: refusing writes, created service_idle");
        } else if !wants_lock && self.active {
            self.active = false;
            match tokio::fs::remove_file(&self.idle_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            log::info!("editor coordination released: resuming writes");
        }
        Ok(())
    }
}

fn sibling(config_path: &Path, suffix: &str) -> PathBuf {
    let mut name = config_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{suffix}"));
    config_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engages_and_releases_around_editor_request() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("ttslo_config.csv");
        let mut handshake = CoordinationHandshake::for_config_path(&config_path);

        handshake.poll().await.unwrap();
        assert!(!handshake.is_active());

        tokio::fs::write(dir.path().join("ttslo_config.csv.editor_wants_lock"), b"").await.unwrap();
        handshake.poll().await.unwrap();
        assert!(handshake.is_active());
        assert!(tokio::fs::metadata(dir.path().join("ttslo_config.csv.service_idle")).await.is_ok());

        tokio::fs::remove_file(dir.path().join("ttslo_config.csv.editor_wants_lock")).await.unwrap();
        handshake.poll().await.unwrap();
        assert!(!handshake.is_active());
        assert!(tokio::fs::metadata(dir.path().join("ttslo_config.csv.service_idle")).await.is_err());
    }
}
