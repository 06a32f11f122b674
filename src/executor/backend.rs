// OS backend seam: window structure, pixel capture and physical input.
use async_trait::async_trait;
use image::RgbImage;

use crate::errors::{AnchorResult, BackendFailure};
use crate::perception::types::{Point, Rect, WindowMeta};
use crate::watchdog::WorkerCall;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Worker invocation that runs [`Backend::window_meta`] out of process and
    /// replies with `WorkerReply<WindowMeta, BackendFailure>`.
    fn window_meta_call(&self) -> WorkerCall;

    /// Structural query for the active window. Executed inside the isolated
    /// worker; may block indefinitely on a wedged accessibility stack.
    fn window_meta(&self) -> Result<WindowMeta, BackendFailure>;

    /// Best-effort metadata covering the primary display.
    fn fallback_meta(&self) -> WindowMeta;

    /// Window pixels for `rect`; pixel (0, 0) is the rect's origin.
    async fn capture_pixels(&self, rect: &Rect) -> AnchorResult<RgbImage>;

    async fn click(&self, at: Point) -> AnchorResult<()>;

    /// Types `text`, clicking `at` first when given.
    async fn type_text(&self, text: &str, at: Option<Point>) -> AnchorResult<()>;
}
