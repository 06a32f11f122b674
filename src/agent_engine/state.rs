use image::RgbImage;

use crate::memory::fingerprint::Fingerprint;
use crate::perception::types::{Point, SemanticMap, WindowMeta};

/// Stages of one `get_full_state` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Start,
    Meta,
    CacheHit,
    CacheMiss,
    Ready,
}

/// Where the semantic map of a cycle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapSource {
    Memory,
    Vision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    /// Click the element, then type text into it.
    Type,
}

/// Result of `execute_action`. Each variant is a distinct, logged outcome.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Performed {
        id: String,
        kind: ActionKind,
        position: Point,
    },
    /// The id is not in the current semantic map; nothing was touched.
    IdentificationFailure { id: String },
    /// The action gate vetoed the target; nothing was touched.
    VisualMismatch {
        id: String,
        position: Point,
        density: f64,
    },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Performed { .. })
    }
}

/// Everything one orchestration cycle learned about the active window.
#[derive(Debug, Clone)]
pub struct FullState {
    pub meta: WindowMeta,
    pub fingerprint: Fingerprint,
    pub semantic_map: SemanticMap,
    /// Window pixels; (0, 0) is `meta.rect`'s origin.
    pub screenshot: RgbImage,
    pub source: MapSource,
}
