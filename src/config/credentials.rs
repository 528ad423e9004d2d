//! Credential Resolver (spec §4 overview row 1, §6 "Environment variables", §9).
//!
//! "A simple ordered list of environment-variable names per logical
//! credential, returning the first present value. No reflection needed; an
//! explicit table is clearer." We take that design note literally: for a
//! given account and scope, build the ordered candidate list spec §6 spells
//! out and return the first pair of variables that are both set.

use std::collections::HashMap;

use crate::exchange::client::Credentials;
use crate::rule::DEFAULT_ACCOUNT;

/// Which scope of credential is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// Market-data and balance reads only.
    ReadOnly,
    /// Order submission and cancellation.
    ReadWrite,
}

impl CredentialScope {
    fn is_rw(self) -> bool {
        matches!(self, CredentialScope::ReadWrite)
    }
}

/// Snapshot of the process environment, resolved once at startup and never
/// re-read afterward (spec §9: "the credential table (immutable after startup)").
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    env: HashMap<String, String>,
}

impl CredentialResolver {
    /// Snapshot `std::env::vars()`.
    #[must_use]
    pub fn from_env() -> Self {
        Self { env: std::env::vars().collect() }
    }

    /// Build a resolver from an explicit map, for tests.
    #[must_use]
    pub fn from_map(env: HashMap<String, String>) -> Self {
        Self { env }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str).filter(|s| !s.is_empty())
    }

    /// Resolve the first complete (key, secret) pair for `account`/`scope`,
    /// per the candidate ordering in spec §6.
    ///
    /// `account` is the rule's `account` column value; anything other than
    /// [`DEFAULT_ACCOUNT`] is resolved via the `_<ACCOUNT>` suffix convention
    /// spec §6 documents for the single named secondary account (`winnie`):
    /// every candidate variable name below gains a trailing
    /// `_<ACCOUNT-UPPERCASED>` before being looked up.
    #[must_use]
    pub fn resolve(&self, account: &str, scope: CredentialScope) -> Option<Credentials> {
        let suffix = account_suffix(account);
        for (key_var, secret_var) in candidate_names(scope, &suffix) {
            if let (Some(api_key), Some(api_secret)) = (self.get(&key_var), self.get(&secret_var))
            {
                return Some(Credentials {
                    api_key: api_key.to_owned(),
                    api_secret: api_secret.to_owned(),
                });
            }
        }
        None
    }
}

fn account_suffix(account: &str) -> String {
    if account.is_empty() || account.eq_ignore_ascii_case(DEFAULT_ACCOUNT) {
        String::new()
    } else {
        format!("_{}", account.to_uppercase())
    }
}

/// Ordered (key-variable, secret-variable) candidates for `scope`, spec §6:
///
/// 1. `KRAKEN_API_KEY[_RW]` / `KRAKEN_API_SECRET[_RW]`
/// 2. `COPILOT_KRAKEN_API_KEY[_RW]` / `COPILOT_KRAKEN_API_SECRET[_RW]`
/// 3. `copilot_kraken_api_key[_rw]` / `copilot_kraken_api_secret[_rw]`
/// 4. `COPILOT_W_KR_RO_PUBLIC`/`COPILOT_W_KR_RO_SECRET` (or `_RW_` for write)
/// 5. `COPILOT_W_KR_PUBLIC` / `COPILOT_W_KR_SECRET` (scope-agnostic fallback)
///
/// Every name above additionally gains `account_suffix` before lookup.
fn candidate_names(scope: CredentialScope, account_suffix: &str) -> Vec<(String, String)> {
    let rw = if scope.is_rw() { "_RW" } else { "" };
    let rw_lower = if scope.is_rw() { "_rw" } else { "" };
    let wkr_scope = if scope.is_rw() { "RW" } else { "RO" };

    let suffixed = |base: &str| format!("{base}{account_suffix}");

    vec![
        (suffixed(&format!("KRAKEN_API_KEY{rw}")), suffixed(&format!("KRAKEN_API_SECRET{rw}"))),
        (
            suffixed(&format!("COPILOT_KRAKEN_API_KEY{rw}")),
            suffixed(&format!("COPILOT_KRAKEN_API_SECRET{rw}")),
        ),
        (
            suffixed(&format!("copilot_kraken_api_key{rw_lower}")),
            suffixed(&format!("copilot_kraken_api_secret{rw_lower}")),
        ),
        (
            suffixed(&format!("COPILOT_W_KR_{wkr_scope}_PUBLIC")),
            suffixed(&format!("COPILOT_W_KR_{wkr_scope}_SECRET")),
        ),
        (suffixed("COPILOT_W_KR_PUBLIC"), suffixed("COPILOT_W_KR_SECRET")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> CredentialResolver {
        CredentialResolver::from_map(
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect(),
        )
    }

    #[test]
    fn prefers_primary_kraken_names_over_fallbacks() {
        let resolver = env(&[
            ("KRAKEN_API_KEY", "k1"),
            ("KRAKEN_API_SECRET", "s1"),
            ("COPILOT_W_KR_PUBLIC", "k2"),
            ("COPILOT_W_KR_SECRET", "s2"),
        ]);
        let creds = resolver.resolve("primary", CredentialScope::ReadOnly).unwrap();
        assert_eq!(creds.api_key, "k1");
    }

    #[test]
    fn falls_back_to_copilot_generic_pair() {
        let resolver =
            env(&[("COPILOT_W_KR_PUBLIC", "k2"), ("COPILOT_W_KR_SECRET", "s2")]);
        let creds = resolver.resolve("primary", CredentialScope::ReadOnly).unwrap();
        assert_eq!(creds.api_key, "k2");
        assert_eq!(creds.api_secret, "s2");
    }

    #[test]
    fn read_write_is_distinct_from_read_only() {
        let resolver = env(&[("KRAKEN_API_KEY", "ro"), ("KRAKEN_API_SECRET", "ro-s")]);
        assert!(resolver.resolve("primary", CredentialScope::ReadOnly).is_some());
        assert!(resolver.resolve("primary", CredentialScope::ReadWrite).is_none());
    }

    #[test]
    fn secondary_account_uses_suffixed_names() {
        let resolver = env(&[
            ("KRAKEN_API_KEY_WINNIE", "k-winnie"),
            ("KRAKEN_API_SECRET_WINNIE", "s-winnie"),
            ("KRAKEN_API_KEY", "k-primary"),
            ("KRAKEN_API_SECRET", "s-primary"),
        ]);
        let creds = resolver.resolve("winnie", CredentialScope::ReadOnly).unwrap();
        assert_eq!(creds.api_key, "k-winnie");
    }

    #[test]
    fn missing_credential_resolves_to_none() {
        let resolver = env(&[]);
        assert!(resolver.resolve("primary", CredentialScope::ReadOnly).is_none());
    }
}
