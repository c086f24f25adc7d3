//! Suite-scoped random identifier used to namespace resource names.

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

const GENERATED_LEN: usize = 6;
const MAX_LEN: usize = 63;

/// Unique token shared by every component of one suite run.
///
/// Lowercase alphanumerics and `-` only, so it can be embedded in DNS labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RandomIdentifier(String);

impl RandomIdentifier {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        RandomIdentifier(id[..GENERATED_LEN].to_string())
    }

    /// Use a fixed identifier (e.g. to re-attach to a previous run's resources).
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().to_ascii_lowercase();
        if id.is_empty() || id.len() > MAX_LEN {
            return Err(HarnessError::Config(format!(
                "random identifier must be 1..={} characters, got {:?}",
                MAX_LEN, id
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || id.starts_with('-')
            || id.ends_with('-')
        {
            return Err(HarnessError::Config(format!(
                "random identifier {:?} is not a valid DNS label",
                id
            )));
        }
        Ok(RandomIdentifier(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<id>.<domain>`
    pub fn subdomain_of(&self, domain: &str) -> String {
        format!("{}.{}", self.0, domain)
    }

    /// `<name>-<id>`
    pub fn suffixed(&self, name: &str) -> String {
        format!("{}-{}", name, self.0)
    }
}

impl std::fmt::Display for RandomIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RandomIdentifier {
    type Error = HarnessError;

    fn try_from(s: String) -> Result<Self> {
        RandomIdentifier::new(s)
    }
}

impl From<RandomIdentifier> for String {
    fn from(id: RandomIdentifier) -> Self {
        id.0
    }
}
