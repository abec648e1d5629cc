// Engine operating mode

use serde::Serialize;
use std::fmt;

/// Two-state lifecycle: clients learn in `Training`, a frozen policy runs in
/// `Inference`. Either state can be left at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    #[default]
    Training,
    Inference,
}

impl EngineMode {
    pub fn is_training(&self) -> bool {
        matches!(self, EngineMode::Training)
    }

    pub fn is_inference(&self) -> bool {
        matches!(self, EngineMode::Inference)
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Training => write!(f, "training"),
            EngineMode::Inference => write!(f, "inference"),
        }
    }
}
