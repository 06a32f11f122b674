use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Title reported when the structural window query is unavailable.
pub const FALLBACK_TITLE: &str = "DESKTOP_FALLBACK";

/// Absolute screen position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Position relative to a window's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Offset {
    pub dx: i32,
    pub dy: i32,
}

/// Window rectangle in absolute screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    #[serde(alias = "w")]
    pub width: u32,
    #[serde(alias = "h")]
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Absolute point → offset from this rect's origin.
    pub fn to_local(&self, point: Point) -> Offset {
        Offset {
            dx: point.x - self.x,
            dy: point.y - self.y,
        }
    }

    /// Offset from this rect's origin → absolute point.
    pub fn to_absolute(&self, offset: Offset) -> Point {
        Point::new(self.x + offset.dx, self.y + offset.dy)
    }
}

/// Structural facts about the active window for one orchestration cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMeta {
    pub title: String,
    pub pid: u32,
    pub rect: Rect,
}

impl WindowMeta {
    /// Fallback metadata covering `display` when the structural query fails.
    pub fn fallback(display: Rect) -> Self {
        Self {
            title: FALLBACK_TITLE.to_string(),
            pid: 0,
            rect: display,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.pid == 0 && self.title == FALLBACK_TITLE
    }
}

/// One labelled region reported by the vision engine, in absolute coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub text: String,
    pub position: Point,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Observed by the vision engine during this cycle.
    Vision,
    /// Reconstructed from the fingerprint store.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticElement {
    pub id: String,
    pub label: String,
    pub offset: Offset,
    pub position: Point,
    pub confidence: f32,
    pub provenance: Provenance,
}

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Derives a stable element id from label text.
///
/// `"Email Address:"` → `email_address`. Returns `None` when nothing is left.
pub fn normalize_id(label: &str) -> Option<String> {
    let lowered = label.trim().to_lowercase();
    let stripped = lowered.trim_end_matches(|c: char| !c.is_alphanumeric());
    let id = whitespace_run().replace_all(stripped, "_");
    if id.is_empty() {
        None
    } else {
        Some(id.into_owned())
    }
}

/// Ordered id → element mapping for one window.
///
/// Elements keep insertion (detection) order. A label whose id is already
/// taken is stored under the first free `id_2`, `id_3`, ... so two identical
/// labels never overwrite each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticMap {
    elements: Vec<SemanticElement>,
}

impl SemanticMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SemanticElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SemanticElement> {
        self.elements.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.elements.iter().map(|e| e.id.as_str()).collect()
    }

    /// Inserts `element`, renaming it on id collision. Returns the id it was stored under.
    pub fn insert(&mut self, mut element: SemanticElement) -> String {
        if self.contains(&element.id) {
            let base = element.id.clone();
            let mut n = 2;
            let resolved = loop {
                let candidate = format!("{base}_{n}");
                if !self.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            };
            tracing::warn!(id = %base, resolved = %resolved, "semantic id collision; suffixing");
            element.id = resolved;
        }
        let id = element.id.clone();
        self.elements.push(element);
        id
    }

    /// Adds a fresh vision detection observed inside `rect`.
    /// Returns `None` when the label normalizes to an empty id.
    pub fn insert_detection(&mut self, detection: Detection, rect: &Rect) -> Option<String> {
        let Some(id) = normalize_id(&detection.text) else {
            tracing::debug!(text = %detection.text, "detection has no usable label; dropped");
            return None;
        };
        Some(self.insert(SemanticElement {
            id,
            label: detection.text.trim().to_string(),
            offset: rect.to_local(detection.position),
            position: detection.position,
            confidence: detection.confidence,
            provenance: Provenance::Vision,
        }))
    }
}

impl<'a> IntoIterator for &'a SemanticMap {
    type Item = &'a SemanticElement;
    type IntoIter = std::slice::Iter<'a, SemanticElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(text: &str, x: i32, y: i32) -> Detection {
        Detection {
            text: text.to_string(),
            position: Point::new(x, y),
            confidence: 0.9,
        }
    }

    #[test]
    fn normalize_strips_case_whitespace_and_trailing_punctuation() {
        assert_eq!(normalize_id("Email Address:").as_deref(), Some("email_address"));
        assert_eq!(normalize_id("  Sign   In ").as_deref(), Some("sign_in"));
        assert_eq!(normalize_id("Submit!").as_deref(), Some("submit"));
        assert_eq!(normalize_id("Username").as_deref(), Some("username"));
        assert_eq!(normalize_id(" ... "), None);
    }

    #[test]
    fn normalize_strips_non_ascii_trailing_marks() {
        assert_eq!(normalize_id("Name：").as_deref(), Some("name"));
        assert_eq!(normalize_id("Next…").as_deref(), Some("next"));
        assert_eq!(normalize_id("Passwort »").as_deref(), Some("passwort"));
        assert_eq!(normalize_id("Größe").as_deref(), Some("größe"));
    }

    #[test]
    fn rect_translation_is_symmetric() {
        let rect = Rect::new(100, 100, 800, 600);
        let offset = rect.to_local(Point::new(150, 160));
        assert_eq!(offset, Offset { dx: 50, dy: 60 });
        assert_eq!(rect.to_absolute(offset), Point::new(150, 160));
    }

    #[test]
    fn duplicate_labels_are_suffixed_not_overwritten() {
        let rect = Rect::new(0, 0, 400, 300);
        let mut map = SemanticMap::new();
        assert_eq!(map.insert_detection(detection("Submit", 10, 10), &rect).as_deref(), Some("submit"));
        assert_eq!(map.insert_detection(detection("submit:", 10, 50), &rect).as_deref(), Some("submit_2"));
        assert_eq!(map.insert_detection(detection("SUBMIT", 10, 90), &rect).as_deref(), Some("submit_3"));

        assert_eq!(map.len(), 3);
        assert_eq!(map.get("submit").map(|e| e.position), Some(Point::new(10, 10)));
        assert_eq!(map.get("submit_2").map(|e| e.position), Some(Point::new(10, 50)));
        assert_eq!(map.ids(), vec!["submit", "submit_2", "submit_3"]);
    }

    #[test]
    fn window_meta_accepts_short_rect_keys() {
        let meta: WindowMeta = serde_json::from_str(
            r#"{"title":"Login","pid":42,"rect":{"x":1,"y":2,"w":300,"h":200}}"#,
        )
        .unwrap();
        assert_eq!(meta.rect, Rect::new(1, 2, 300, 200));
        assert!(!meta.is_fallback());
        assert!(WindowMeta::fallback(Rect::new(0, 0, 1920, 1080)).is_fallback());
    }
}
