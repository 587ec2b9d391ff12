use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

/// Identifier of a test unit, unique within its environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestUnitId(String);

impl TestUnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TestUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestUnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TestUnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for TestUnitId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TestUnitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
