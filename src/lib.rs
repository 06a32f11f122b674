pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod memory;
pub mod perception;
pub mod watchdog;

pub use agent_engine::engine::{Orchestrator, AUDIT_TARGET};
pub use agent_engine::state::{ActionKind, ActionOutcome, CycleState, FullState, MapSource};
pub use errors::{AnchorError, AnchorResult, BackendFailure};
pub use executor::backend::Backend;
pub use perception::traits::{VisionEngine, VisionLoader};
pub use perception::types::{Detection, Point, Rect, SemanticElement, SemanticMap, WindowMeta};

/// Installs the fmt subscriber (`RUST_LOG`, default `info`) after loading `.env`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
    if installed.is_ok() {
        tracing::debug!(version = env!("CARGO_PKG_VERSION"), "tracing initialized");
    }
}
