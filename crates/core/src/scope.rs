// Scopes
//
// A scope is a routing key: the user a presence fact belongs to, or the
// first-party sentinel for trusted callers. Scopes are never persistence
// keys inside this core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved scope string for first-party/trusted callers.
pub const FIRST_PARTY_SCOPE: &str = "__first_party__";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scope {
    FirstParty,
    User(String),
}

impl Scope {
    pub fn user(name: impl Into<String>) -> Self {
        Self::User(name.into())
    }

    pub fn is_first_party(&self) -> bool {
        matches!(self, Self::FirstParty)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::FirstParty => FIRST_PARTY_SCOPE,
            Self::User(name) => name,
        }
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        if value == FIRST_PARTY_SCOPE {
            Self::FirstParty
        } else {
            Self::User(value)
        }
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.as_str().to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
