//! Notifications routing configuration (spec §6 "Notifications configuration (INI)").
//!
//! `[recipients]` maps usernames to destination ids; one `[notify.<event_kind>]`
//! section per event kind lists the usernames subscribed to it. Parsed with the
//! `ini` crate, the pack's ecosystem-standard INI reader (teacher's
//! `utils::config::Config` establishes the "typed struct populated from an
//! external config source" shape this generalizes).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use ini::Ini;

use crate::notifications::EventKind;

/// Recipients table plus per-event routing, loaded from an INI file.
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    /// username -> destination id (e.g. a Telegram chat id).
    recipients: HashMap<String, String>,
    /// event kind -> usernames subscribed to it.
    routes: HashMap<EventKind, Vec<String>>,
}

impl NotificationConfig {
    /// Parse `path`. A missing file yields an empty, inert configuration
    /// (every event kind routes to no one), matching spec §4.5's "a
    /// destination not present in the table for an event is silently skipped".
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not valid INI.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)
            .with_context(|| format!("parsing notifications config {}", path.display()))?;

        let mut recipients = HashMap::new();
        if let Some(section) = ini.section(Some("recipients")) {
            for (user, destination) in section.iter() {
                recipients.insert(user.to_owned(), destination.to_owned());
            }
        }

        let mut routes = HashMap::new();
        for kind in EventKind::ALL {
            let section_name = format!("notify.{}", kind.as_str());
            if let Some(section) = ini.section(Some(section_name.as_str())) {
                if let Some(users) = section.get("users") {
                    let list: Vec<String> =
                        users.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect();
                    routes.insert(*kind, list);
                }
            }
        }

        Ok(Self { recipients, routes })
    }

    /// Destination ids subscribed to `kind` (spec §4.5 "Routing").
    #[must_use]
    pub fn destinations_for(&self, kind: EventKind) -> Vec<String> {
        let Some(users) = self.routes.get(&kind) else {
            return Vec::new();
        };
        users.iter().filter_map(|user| self.recipients.get(user)).cloned().collect()
    }

    /// Every destination id ever registered, used to broadcast the
    /// recovery-announcement message (spec §4.5 "every active recipient").
    #[must_use]
    pub fn all_destinations(&self) -> Vec<String> {
        self.recipients.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn routes_event_to_mapped_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.ini");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[recipients]\nalice = 12345\n\n[notify.tsl_filled]\nusers = alice\n")
            .unwrap();

        let config = NotificationConfig::load(&path).unwrap();
        assert_eq!(config.destinations_for(EventKind::TslFilled), vec!["12345".to_owned()]);
        assert!(config.destinations_for(EventKind::AppExit).is_empty());
    }

    #[test]
    fn missing_file_is_inert() {
        let config = NotificationConfig::load(Path::new("/nonexistent/notifications.ini")).unwrap();
        assert!(config.destinations_for(EventKind::TslFilled).is_empty());
    }
}
