//! Service scope registry
//!
//! Maps Workdesk service identifiers to the OAuth scope strings the provider
//! understands. Commands name services; the registry translates them into a
//! scope list, optionally reduced to read-only capability.

use crate::error::AuthError;

/// Scopes declared for one service
#[derive(Debug, Clone)]
pub struct ScopeSet {
    pub service: String,
    pub full: Vec<String>,
    pub read_only: Vec<String>,
}

/// Immutable service-to-scope table
#[derive(Debug, Clone)]
pub struct ScopeRegistry {
    services: Vec<ScopeSet>,
}

impl ScopeRegistry {
    pub fn new(services: Vec<ScopeSet>) -> Self {
        Self { services }
    }

    /// Look up the scope set declared for a service
    pub fn get(&self, service: &str) -> Option<&ScopeSet> {
        self.services.iter().find(|s| s.service == service)
    }

    /// All registered service names, in declaration order
    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.service.as_str()).collect()
    }

    /// Translate service names into a deduplicated scope list
    ///
    /// Scopes keep first-seen order across the requested services. An
    /// unregistered service fails the whole request.
    pub fn scopes_for(&self, services: &[&str], read_only: bool) -> Result<Vec<String>, AuthError> {
        let mut scopes: Vec<String> = Vec::new();

        for name in services {
            let set = self.get(name).ok_or_else(|| {
                AuthError::UnknownService(format!(
                    "'{}' is not a registered service (expected one of: {})",
                    name,
                    self.service_names().join(", ")
                ))
            })?;

            let list = if read_only { &set.read_only } else { &set.full };
            for scope in list {
                if !scopes.contains(scope) {
                    scopes.push(scope.clone());
                }
            }
        }

        Ok(scopes)
    }
}

impl Default for ScopeRegistry {
    /// The Workdesk service table
    fn default() -> Self {
        fn set(service: &str, full: &[&str], read_only: &[&str]) -> ScopeSet {
            ScopeSet {
                service: service.to_string(),
                full: full.iter().map(|s| s.to_string()).collect(),
                read_only: read_only.iter().map(|s| s.to_string()).collect(),
            }
        }

        Self::new(vec![
            set(
                "mail",
                &["account.basic", "mail.readwrite", "mail.send"],
                &["account.basic", "mail.readonly"],
            ),
            set(
                "calendar",
                &["account.basic", "calendar.readwrite"],
                &["account.basic", "calendar.readonly"],
            ),
            set(
                "drive",
                &["account.basic", "drive.readwrite", "drive.share"],
                &["account.basic", "drive.readonly"],
            ),
            // Directory lookups are read-only by nature
            set(
                "directory",
                &["account.basic", "directory.lookup"],
                &["account.basic", "directory.lookup"],
            ),
            set(
                "admin",
                &["account.basic", "admin.manage", "admin.audit"],
                &["account.basic", "admin.audit.readonly"],
            ),
        ])
    }
}
