//! Perceptual veto applied right before a physical click or keystroke.
//!
//! Crops a small patch around the target, runs Canny edge detection on its
//! luma channel and accepts only a moderate edge density: an empty patch
//! means background, a saturated one means dense text or noise rather than
//! a discrete control. This is a plausibility check, not a classifier.
use image::{GrayImage, RgbImage};
use imageproc::edges::canny;
use serde::{Deserialize, Serialize};

use crate::perception::types::Offset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Half the side length of the verification patch, in pixels.
    #[serde(default = "default_radius")]
    pub radius: u32,
    /// Exclusive lower bound on edge density.
    #[serde(default = "default_min_density")]
    pub min_density: f64,
    /// Exclusive upper bound on edge density.
    #[serde(default = "default_max_density")]
    pub max_density: f64,
    /// Canny hysteresis thresholds on gradient magnitude.
    #[serde(default = "default_canny_low")]
    pub canny_low: f32,
    #[serde(default = "default_canny_high")]
    pub canny_high: f32,
}

fn default_radius() -> u32 {
    30
}

fn default_min_density() -> f64 {
    0.02
}

fn default_max_density() -> f64 {
    0.25
}

fn default_canny_low() -> f32 {
    50.0
}

fn default_canny_high() -> f32 {
    150.0
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            min_density: default_min_density(),
            max_density: default_max_density(),
            canny_low: default_canny_low(),
            canny_high: default_canny_high(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Target lies outside the captured window.
    EmptyPatch,
    TooSparse,
    TooDense,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Accept { density: f64 },
    Reject { density: f64, reason: RejectReason },
}

impl GateVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, GateVerdict::Accept { .. })
    }

    pub fn density(&self) -> f64 {
        match self {
            GateVerdict::Accept { density } | GateVerdict::Reject { density, .. } => *density,
        }
    }
}

pub struct ActionGate {
    config: GateConfig,
}

impl ActionGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn with_default() -> Self {
        Self::new(GateConfig::default())
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Checks the patch around `target` (window-local pixels) in `screenshot`.
    pub fn verify(&self, target: Offset, screenshot: &RgbImage) -> GateVerdict {
        let Some(patch) = crop_patch(screenshot, target, self.config.radius) else {
            tracing::debug!(dx = target.dx, dy = target.dy, "gate patch empty");
            return GateVerdict::Reject {
                density: 0.0,
                reason: RejectReason::EmptyPatch,
            };
        };
        let density = edge_density(&patch, self.config.canny_low, self.config.canny_high);
        let verdict = self.judge(density);
        tracing::debug!(
            dx = target.dx,
            dy = target.dy,
            density,
            accepted = verdict.is_accept(),
            "gate verdict"
        );
        verdict
    }

    /// Band decision on an already computed edge density. Both bounds are strict.
    pub fn judge(&self, density: f64) -> GateVerdict {
        if density <= self.config.min_density {
            GateVerdict::Reject {
                density,
                reason: RejectReason::TooSparse,
            }
        } else if density >= self.config.max_density {
            GateVerdict::Reject {
                density,
                reason: RejectReason::TooDense,
            }
        } else {
            GateVerdict::Accept { density }
        }
    }
}

/// Cuts the `2 * radius` square around `center`, clamped to the image, as luma.
fn crop_patch(screenshot: &RgbImage, center: Offset, radius: u32) -> Option<GrayImage> {
    let (w, h) = (screenshot.width() as i64, screenshot.height() as i64);
    let (cx, cy, r) = (center.dx as i64, center.dy as i64, radius as i64);
    if cx < 0 || cy < 0 || cx >= w || cy >= h {
        return None;
    }

    let x1 = (cx - r).max(0);
    let y1 = (cy - r).max(0);
    let x2 = (cx + r).min(w);
    let y2 = (cy + r).min(h);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let patch = image::imageops::crop_imm(
        screenshot,
        x1 as u32,
        y1 as u32,
        (x2 - x1) as u32,
        (y2 - y1) as u32,
    )
    .to_image();
    Some(image::imageops::grayscale(&patch))
}

/// Fraction of patch pixels marked as edges by Canny with the given thresholds.
pub fn edge_density(patch: &GrayImage, low: f32, high: f32) -> f64 {
    let (w, h) = patch.dimensions();
    // canny leaves a one-pixel border untouched; smaller patches have no interior.
    if w < 3 || h < 3 {
        return 0.0;
    }

    let edges = canny(patch, low.min(high), low.max(high));
    let count = edges.pixels().filter(|p| p[0] > 0).count();
    count as f64 / (w as u64 * h as u64) as f64
}
