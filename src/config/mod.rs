//! Ambient configuration surfaces: credential resolution and the
//! notifications INI file (spec §6, §9 "Credential resolution" design note).

pub mod credentials;
pub mod notifications;

pub use credentials::{CredentialResolver, CredentialScope};
pub use notifications::NotificationConfig;
