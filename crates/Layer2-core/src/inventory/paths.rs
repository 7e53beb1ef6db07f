//! Registry path scheme
//!
//! `/<root>/cm-handles[@id='<id>']`, `.../state`, `.../state/lock-reason`

use cmsync_foundation::{Error, Result};

pub const CM_HANDLES: &str = "cm-handles";
pub const STATE: &str = "state";
pub const LOCK_REASON: &str = "lock-reason";

/// Characters an id may not contain (they would break the path predicate)
const FORBIDDEN_ID_CHARS: &[char] = &['\'', '"', '/', '[', ']', '@'];

/// Builds registry paths for one registry root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPaths {
    root: String,
}

impl RegistryPaths {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Name of the root node as used in `create_child("/", ...)`
    pub fn root_name(&self) -> &str {
        self.root.trim_start_matches('/')
    }

    pub fn handle(&self, id: &str) -> String {
        format!("{}/{}[@id='{}']", self.root, CM_HANDLES, id)
    }

    pub fn state(&self, id: &str) -> String {
        format!("{}/{}", self.handle(id), STATE)
    }

    pub fn lock_reason(&self, id: &str) -> String {
        format!("{}/{}", self.state(id), LOCK_REASON)
    }
}

/// Reject ids that are empty or would not survive in a path
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidInput("cm handle id must not be empty".to_string()));
    }
    if let Some(c) = id
        .chars()
        .find(|c| c.is_whitespace() || FORBIDDEN_ID_CHARS.contains(c))
    {
        return Err(Error::InvalidInput(format!(
            "cm handle id '{}' contains invalid character {:?}",
            id, c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let paths = RegistryPaths::new("/dmi-registry");
        assert_eq!(paths.handle("cmh-1"), "/dmi-registry/cm-handles[@id='cmh-1']");
        assert_eq!(paths.state("cmh-1"), "/dmi-registry/cm-handles[@id='cmh-1']/state");
        assert_eq!(
            paths.lock_reason("cmh-1"),
            "/dmi-registry/cm-handles[@id='cmh-1']/state/lock-reason"
        );
        assert_eq!(paths.root_name(), "dmi-registry");
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("cmh-1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("a b").is_err());
        assert!(validate_id("a'b").is_err());
        assert!(validate_id("a/b").is_err());
    }
}
