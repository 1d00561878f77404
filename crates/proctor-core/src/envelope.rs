use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged notification pushed to a browser connection.
///
/// Wire form is exactly `{"event": "...", "args": [...]}`; consumers decode
/// by the `event` tag. There is no schema versioning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub args: Vec<Value>,
}

impl Envelope {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    /// Emitted when the counterpart connection for an identity comes up.
    pub fn connected() -> Self {
        Self::new("connected", vec![])
    }

    /// Emitted when a grading-agent connection goes away.
    pub fn disconnected() -> Self {
        Self::new("disconnected", vec![])
    }

    /// Carries the decoded agent reply for a finished test run.
    pub fn test_result(reply: Value) -> Self {
        Self::new("test_result", vec![reply])
    }

    pub fn to_json(&self) -> String {
        // A struct of a String and Values cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}
