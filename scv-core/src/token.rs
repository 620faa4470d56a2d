use serde::{Deserialize, Serialize};

use crate::error::InvalidTokenKind;
use crate::ids::TargetId;

const RANDOM_LEN: usize = 36;

/// Opaque checkout credential, `"<targetId>:<36-char random>"`.
///
/// The target prefix is a routing hint only; the authoritative check is
/// always a lookup in the owning [`crate::Target`]'s token map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(pub String);

impl AuthToken {
    pub(crate) fn generate(target: &TargetId) -> Self {
        use rand::distributions::Alphanumeric;
        use rand::Rng;

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_LEN)
            .map(char::from)
            .collect();
        Self(format!("{}:{}", target.as_str(), suffix))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the token into its routing prefix and the rest, failing if
    /// there is no `:` separator at all. Does not validate that the prefix
    /// names a real target — that is a separate, map-backed check.
    pub(crate) fn target_prefix(&self) -> Result<&str, InvalidTokenKind> {
        match self.0.split_once(':') {
            Some((prefix, _)) => Ok(prefix),
            None => Err(InvalidTokenKind::Malformed),
        }
    }
}

impl std::fmt::Display for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AuthToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}
