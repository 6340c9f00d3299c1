//! Permission model for Meridian extensions.
//!
//! Every capability an extension uses must be declared in its manifest as a
//! permission string and checked at the point of use. This module provides:
//! - The fixed allow-list of permission strings plus the `network:` grammar
//! - `PermissionChecker` - derived once per loaded extension, immutable for
//!   the extension's lifetime
//!
//! Widening permissions requires a full reload: the manifest is re-validated
//! and a fresh checker is derived.

use std::collections::HashSet;

use thiserror::Error;

/// Fixed allow-list of permission strings.
///
/// A permission string is valid iff it is an exact member of this list or it
/// matches one of the `network:` host patterns (see [`is_valid_permission`]).
/// Unknown strings fail manifest validation; the host never tolerates ad-hoc
/// capabilities.
pub const PERMISSION_ALLOW_LIST: &[&str] = &[
    "network:*",
    "database.own",
    "storage.local",
    "user.profile.read",
    "chat.history.read",
    "chat.message.write",
    "provider.register",
    "tools.register",
    "actions.register",
    "settings.register",
    "commands.register",
    "panels.register",
    "events.emit",
    "scheduler.register",
    "files.read",
    "files.write",
    "clipboard.read",
    "clipboard.write",
];

/// Permission-related errors.
///
/// The `Display` output is surfaced verbatim to the extension as the denial
/// reason, so every variant names the extension and what exactly was missing.
#[derive(Debug, Clone, Error)]
pub enum PermissionError {
    #[error("Extension '{extension}' has not been granted permission '{permission}'")]
    Missing {
        extension: String,
        permission: String,
    },

    #[error(
        "Network access to '{requested}' denied for extension '{extension}'; granted hosts: {granted}"
    )]
    NetworkDenied {
        extension: String,
        requested: String,
        granted: String,
    },

    #[error(
        "Access to local address '{requested}' denied for extension '{extension}': localhost requires an explicit 'network:localhost[:port]' grant"
    )]
    LocalhostDenied {
        extension: String,
        requested: String,
    },
}

/// Result type for permission checks.
pub type PermissionResult = Result<(), PermissionError>;

/// A parsed `network:<host>[:<port>]` grant.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NetworkGrant {
    host: String,
    port: Option<u16>,
}

impl NetworkGrant {
    /// Human-readable form used in denial reasons.
    fn describe(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

/// Parse the part after `network:` into a host grant.
///
/// Accepted shapes: `localhost:<port>`, `<host>`, `<host>:<port>`. Hosts are
/// dot-separated labels of alphanumerics and hyphens; anything else (for
/// example an underscore) is rejected.
fn parse_network_grant(rest: &str) -> Option<NetworkGrant> {
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str.parse().ok()?;
            (host, Some(port))
        }
        None => (rest, None),
    };

    if host == "localhost" || is_valid_hostname(host) {
        Some(NetworkGrant {
            host: host.to_string(),
            port,
        })
    } else {
        None
    }
}

fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }

    host.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Check whether a permission string is valid.
///
/// Valid means: an exact member of [`PERMISSION_ALLOW_LIST`], or a
/// `network:` string whose host/port part parses (see
/// [`parse_network_grant`]).
pub fn is_valid_permission(permission: &str) -> bool {
    if PERMISSION_ALLOW_LIST.contains(&permission) {
        return true;
    }

    match permission.strip_prefix("network:") {
        Some(rest) => parse_network_grant(rest).is_some(),
        None => false,
    }
}

/// Capability checker derived from an extension's granted permission set.
///
/// Constructed once when the extension activates and immutable thereafter.
/// Handlers call the relevant `check_*` before any side effect and must
/// surface the error's `Display` verbatim to the extension.
#[derive(Debug, Clone)]
pub struct PermissionChecker {
    extension_id: String,
    grants: HashSet<String>,
    network_wildcard: bool,
    network_grants: Vec<NetworkGrant>,
}

impl PermissionChecker {
    /// Derive a checker from a validated, granted permission set.
    ///
    /// Invalid permission strings never reach this point; the manifest
    /// validator has already rejected them.
    pub fn new(extension_id: impl Into<String>, granted: &[String]) -> Self {
        let mut network_wildcard = false;
        let mut network_grants = Vec::new();
        let mut grants = HashSet::new();

        for permission in granted {
            if permission == "network:*" {
                network_wildcard = true;
            } else if let Some(rest) = permission.strip_prefix("network:") {
                if let Some(grant) = parse_network_grant(rest) {
                    network_grants.push(grant);
                }
            } else {
                grants.insert(permission.clone());
            }
        }

        Self {
            extension_id: extension_id.into(),
            grants,
            network_wildcard,
            network_grants,
        }
    }

    /// Check an exact (non-network) capability grant.
    pub fn check(&self, permission: &str) -> PermissionResult {
        if self.grants.contains(permission) {
            Ok(())
        } else {
            Err(PermissionError::Missing {
                extension: self.extension_id.clone(),
                permission: permission.to_string(),
            })
        }
    }

    /// Check network access to a host and port.
    ///
    /// Localhost (and loopback addresses) always require an explicit
    /// `network:localhost[:port]` grant; `network:*` does not cover them.
    /// A portless `network:<host>` grant covers every port on that host.
    pub fn check_network(&self, host: &str, port: Option<u16>) -> PermissionResult {
        let requested = match port {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        if is_loopback(host) {
            let allowed = self.network_grants.iter().any(|grant| {
                grant.host == "localhost" && (grant.port.is_none() || grant.port == port)
            });
            return if allowed {
                Ok(())
            } else {
                Err(PermissionError::LocalhostDenied {
                    extension: self.extension_id.clone(),
                    requested,
                })
            };
        }

        if self.network_wildcard {
            return Ok(());
        }

        let allowed = self
            .network_grants
            .iter()
            .any(|grant| grant.host == host && (grant.port.is_none() || grant.port == port));

        if allowed {
            Ok(())
        } else {
            let granted = if self.network_grants.is_empty() {
                "none".to_string()
            } else {
                self.network_grants
                    .iter()
                    .map(NetworkGrant::describe)
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            Err(PermissionError::NetworkDenied {
                extension: self.extension_id.clone(),
                requested,
                granted,
            })
        }
    }

    /// Check permission to emit events.
    pub fn check_events(&self) -> PermissionResult {
        self.check("events.emit")
    }

    /// Check permission to use the per-extension document store.
    pub fn check_storage(&self) -> PermissionResult {
        self.check("database.own")
    }

    /// Check permission to use the secret store.
    pub fn check_secrets(&self) -> PermissionResult {
        self.check("storage.local")
    }

    /// Check permission to register and cancel scheduled jobs.
    pub fn check_scheduler(&self) -> PermissionResult {
        self.check("scheduler.register")
    }

    /// Check permission to register an AI provider.
    pub fn check_provider_register(&self) -> PermissionResult {
        self.check("provider.register")
    }

    /// Check permission to register tools.
    pub fn check_tools_register(&self) -> PermissionResult {
        self.check("tools.register")
    }

    /// Check permission to register actions.
    pub fn check_actions_register(&self) -> PermissionResult {
        self.check("actions.register")
    }

    /// Check permission to append chat instructions.
    pub fn check_chat_write(&self) -> PermissionResult {
        self.check("chat.message.write")
    }

    /// Check permission to read user profile data.
    pub fn check_user_read(&self) -> PermissionResult {
        self.check("user.profile.read")
    }

    /// The extension this checker was derived for.
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }
}

fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(granted: &[&str]) -> PermissionChecker {
        let granted: Vec<String> = granted.iter().map(|s| s.to_string()).collect();
        PermissionChecker::new("pub.test", &granted)
    }

    #[test]
    fn test_allow_list_members_are_valid() {
        for permission in PERMISSION_ALLOW_LIST {
            assert!(is_valid_permission(permission), "{permission}");
        }
    }

    #[test]
    fn test_network_pattern_validity() {
        assert!(is_valid_permission("network:api.example.com:8080"));
        assert!(is_valid_permission("network:api.example.com"));
        assert!(is_valid_permission("network:localhost:3000"));
        assert!(is_valid_permission("network:localhost"));

        assert!(!is_valid_permission("network:api_example"));
        assert!(!is_valid_permission("network:"));
        assert!(!is_valid_permission("network:host:notaport"));
        assert!(!is_valid_permission("network:-bad.example.com"));
        assert!(!is_valid_permission("filesystem"));
        assert!(!is_valid_permission("storage"));
    }

    #[test]
    fn test_simple_capability_checks() {
        let perms = checker(&["events.emit", "database.own"]);

        assert!(perms.check_events().is_ok());
        assert!(perms.check_storage().is_ok());

        let err = perms.check_secrets().unwrap_err();
        assert!(err.to_string().contains("storage.local"));
        assert!(err.to_string().contains("pub.test"));
    }

    #[test]
    fn test_network_exact_host() {
        let perms = checker(&["network:api.weather.com"]);

        assert!(perms.check_network("api.weather.com", Some(443)).is_ok());
        assert!(perms.check_network("api.weather.com", None).is_ok());

        let err = perms.check_network("evil.example.com", Some(443)).unwrap_err();
        let reason = err.to_string();
        assert!(reason.contains("evil.example.com:443"));
        assert!(reason.contains("api.weather.com"));
    }

    #[test]
    fn test_network_port_specific_grant() {
        let perms = checker(&["network:api.example.com:8080"]);

        assert!(perms.check_network("api.example.com", Some(8080)).is_ok());
        assert!(perms.check_network("api.example.com", Some(9090)).is_err());
    }

    #[test]
    fn test_wildcard_does_not_cover_localhost() {
        let perms = checker(&["network:*"]);

        assert!(perms.check_network("any.example.com", Some(443)).is_ok());
        assert!(perms.check_network("localhost", Some(3000)).is_err());
        assert!(perms.check_network("127.0.0.1", Some(3000)).is_err());
    }

    #[test]
    fn test_localhost_requires_explicit_grant() {
        let perms = checker(&["network:localhost:3000"]);

        assert!(perms.check_network("localhost", Some(3000)).is_ok());
        assert!(perms.check_network("127.0.0.1", Some(3000)).is_ok());
        assert!(perms.check_network("localhost", Some(4000)).is_err());

        let portless = checker(&["network:localhost"]);
        assert!(portless.check_network("localhost", Some(4000)).is_ok());
    }

    #[test]
    fn test_empty_grants_deny_everything() {
        let perms = checker(&[]);

        assert!(perms.check_events().is_err());
        assert!(perms.check_storage().is_err());
        assert!(perms.check_scheduler().is_err());

        let err = perms.check_network("example.com", None).unwrap_err();
        assert!(err.to_string().contains("none"));
    }
}
