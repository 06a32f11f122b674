use serde::{Deserialize, Serialize};

use crate::perception::types::WindowMeta;

/// Identity of a window's layout class: title and size, never position.
///
/// Moving a window keeps its fingerprint; resizing or retitling it does not.
/// Layout changes that keep both title and size go unnoticed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(meta: &WindowMeta) -> Fingerprint {
    let signature = format!("{}|{}x{}", meta.title, meta.rect.width, meta.rect.height);
    Fingerprint(blake3::hash(signature.as_bytes()).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::Rect;

    fn meta(title: &str, x: i32, y: i32, w: u32, h: u32) -> WindowMeta {
        WindowMeta {
            title: title.to_string(),
            pid: 1234,
            rect: Rect::new(x, y, w, h),
        }
    }

    #[test]
    fn position_does_not_change_fingerprint() {
        assert_eq!(
            fingerprint(&meta("A", 10, 10, 800, 600)),
            fingerprint(&meta("A", 500, 500, 800, 600))
        );
        assert_eq!(
            fingerprint(&meta("A", -1920, 0, 800, 600)),
            fingerprint(&meta("A", 0, 0, 800, 600))
        );
    }

    #[test]
    fn size_or_title_change_fingerprint() {
        let base = fingerprint(&meta("A", 10, 10, 800, 600));
        assert_ne!(base, fingerprint(&meta("A", 10, 10, 801, 600)));
        assert_ne!(base, fingerprint(&meta("A", 10, 10, 800, 599)));
        assert_ne!(base, fingerprint(&meta("B", 10, 10, 800, 600)));
        // same digits, different split
        assert_ne!(
            fingerprint(&meta("A", 0, 0, 80, 600)),
            fingerprint(&meta("A", 0, 0, 800, 60))
        );
    }

    #[test]
    fn pid_is_ignored() {
        let mut other = meta("A", 10, 10, 800, 600);
        other.pid = 1;
        assert_eq!(fingerprint(&meta("A", 10, 10, 800, 600)), fingerprint(&other));
    }

    #[test]
    fn fingerprint_is_hex_digest() {
        let fp = fingerprint(&meta("Login", 0, 0, 640, 480));
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
