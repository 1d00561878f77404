use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque key correlating one grading-agent connection and one browser
/// connection. Observed values are student email addresses, but the relay
/// never inspects the contents.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}
