//! Stand-alone isolated worker for headless runs.
//!
//! Serves `window_meta` from the `ANCHOR_WINDOW_META` environment variable
//! (a `WindowMeta` JSON document) instead of querying a live desktop, so the
//! watchdog protocol can be exercised end to end without an accessibility
//! stack. Logs go to stderr; stdout carries only the reply line.

use std::process::ExitCode;

use async_trait::async_trait;
use image::RgbImage;

use seeclaw_anchor::watchdog::worker::{requested_worker, serve, serve_window_meta, WINDOW_META_CALL};
use seeclaw_anchor::watchdog::WorkerCall;
use seeclaw_anchor::{AnchorError, AnchorResult, Backend, BackendFailure, Point, Rect, WindowMeta};

const META_ENV: &str = "ANCHOR_WINDOW_META";

/// Backend whose only structural source is the environment.
struct EnvBackend;

impl EnvBackend {
    fn unsupported(operation: &str) -> AnchorError {
        BackendFailure::new(operation, "not supported by the environment backend").into()
    }
}

#[async_trait]
impl Backend for EnvBackend {
    fn window_meta_call(&self) -> WorkerCall {
        match WorkerCall::current_exe(WINDOW_META_CALL) {
            Ok(call) => call,
            Err(e) => {
                tracing::warn!(error = %e, "current executable unknown; using argv[0]");
                WorkerCall::new(WINDOW_META_CALL, std::env::args().next().unwrap_or_default())
                    .arg(seeclaw_anchor::watchdog::WORKER_FLAG)
                    .arg(WINDOW_META_CALL)
            }
        }
    }

    fn window_meta(&self) -> Result<WindowMeta, BackendFailure> {
        let raw = std::env::var(META_ENV).unwrap_or_default();
        if raw.trim().is_empty() {
            return Err(BackendFailure::new(WINDOW_META_CALL, "no active window"));
        }
        serde_json::from_str(&raw)
            .map_err(|e| BackendFailure::new(WINDOW_META_CALL, format!("invalid {META_ENV}: {e}")))
    }

    fn fallback_meta(&self) -> WindowMeta {
        WindowMeta::fallback(Rect::new(0, 0, 1920, 1080))
    }

    async fn capture_pixels(&self, _rect: &Rect) -> AnchorResult<RgbImage> {
        Err(Self::unsupported("capture_pixels"))
    }

    async fn click(&self, _at: Point) -> AnchorResult<()> {
        Err(Self::unsupported("click"))
    }

    async fn type_text(&self, _text: &str, _at: Option<Point>) -> AnchorResult<()> {
        Err(Self::unsupported("type_text"))
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let Some(call) = requested_worker() else {
        eprintln!("usage: anchor-worker --isolated-worker <call>");
        return ExitCode::from(2);
    };

    let served = match call.as_str() {
        WINDOW_META_CALL => serve_window_meta(&EnvBackend),
        other => serve::<(), _>(Err(BackendFailure::new(other, "unknown isolated call"))),
    };

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, call = %call, "failed to write worker reply");
            ExitCode::FAILURE
        }
    }
}
