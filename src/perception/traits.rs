use async_trait::async_trait;
use image::RgbImage;

use crate::errors::AnchorResult;
use crate::perception::types::{Detection, Rect};

/// Text-anchored region detection over a window capture.
///
/// `image` holds the window pixels; `rect` is where that window sits on
/// screen, so implementations can report absolute positions. Filtering by
/// confidence is left to the caller.
#[async_trait]
pub trait VisionEngine: Send + Sync {
    async fn detect_elements(&self, image: &RgbImage, rect: &Rect) -> AnchorResult<Vec<Detection>>;
}

/// Deferred constructor for the (heavyweight) vision engine.
pub type VisionLoader = Box<dyn Fn() -> AnchorResult<Box<dyn VisionEngine>> + Send + Sync>;
