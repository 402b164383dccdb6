use std::fmt;

use serde::{Deserialize, Serialize};

/// Where an engine is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnginePhase {
    Created,
    Initializing,
    Ready,
    Mounted,
    Unmounted,
    Destroyed,
}

impl EnginePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Mounted => "mounted",
            Self::Unmounted => "unmounted",
            Self::Destroyed => "destroyed",
        }
    }

    /// Plugins used now are installed immediately rather than queued.
    pub fn installs_immediately(self) -> bool {
        matches!(self, Self::Ready | Self::Mounted | Self::Unmounted)
    }
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
