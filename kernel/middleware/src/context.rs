use std::collections::HashMap;

use keel_core::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The value threaded through every middleware of one `execute` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareContext {
    pub action: String,
    pub payload: Payload,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Cooperative flag: later middleware should check it and skip work.
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub result: Option<Payload>,
}

impl MiddlewareContext {
    pub fn new(action: impl Into<String>, payload: Payload) -> Self {
        Self {
            action: action.into(),
            payload,
            ..Default::default()
        }
    }

    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.cancelled = true;
        self.cancel_reason = Some(reason.into());
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
