//! Markdown scene report for escalating an unresolved screen to a human or LLM reviewer.
use crate::perception::types::{SemanticMap, WindowMeta};

/// Renders window title, resolution and one table row per element, followed by
/// an action prompt so the reviewer answers with the next semantic id.
pub fn describe_scene(meta: &WindowMeta, map: &SemanticMap) -> String {
    let mut lines = vec![
        "# Desktop Scene Report".to_string(),
        format!("**Window Title:** {}", meta.title),
        format!("**Resolution:** {}x{}", meta.rect.width, meta.rect.height),
        String::new(),
        "| ID | Text | Confidence | Coordinates |".to_string(),
        "| :--- | :--- | :--- | :--- |".to_string(),
    ];

    for e in map {
        lines.push(format!(
            "| {} | {} | {:.2} | {} |",
            escape_cell(&e.id),
            escape_cell(&e.label),
            e.confidence,
            e.position,
        ));
    }

    if map.is_empty() {
        lines.push("| _none_ | | | |".to_string());
    }

    lines.push(String::new());
    lines.push("## Script Status".to_string());
    lines.push("- [ ] Action Required: Provide next semantic ID to interact with.".to_string());
    lines.join("\n")
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{Detection, Point, Rect};

    #[test]
    fn report_lists_elements_and_ends_with_prompt() {
        let meta = WindowMeta {
            title: "Login".into(),
            pid: 7,
            rect: Rect::new(10, 20, 640, 480),
        };
        let mut map = SemanticMap::new();
        map.insert_detection(
            Detection {
                text: "User|name".into(),
                position: Point::new(110, 120),
                confidence: 0.934,
            },
            &meta.rect,
        );

        let report = describe_scene(&meta, &map);
        assert!(report.starts_with("# Desktop Scene Report"));
        assert!(report.contains("**Window Title:** Login"));
        assert!(report.contains("**Resolution:** 640x480"));
        assert!(report.contains("| user\\|name | User\\|name | 0.93 | (110, 120) |"));
        assert!(report.trim_end().ends_with("Provide next semantic ID to interact with."));
    }
}
