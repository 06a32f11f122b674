use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{AnchorError, AnchorResult};

/// Number of recent steps kept for crash recovery.
pub const JOURNAL_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub view: String,
}

/// Bounded log of recent successful actions, rewritten in full on every append.
///
/// Only read back after a restart to tell the agent where it was; normal
/// orchestration never consults it.
pub struct HistoryJournal {
    records: VecDeque<ActionRecord>,
    file_path: PathBuf,
}

impl HistoryJournal {
    /// Opens the journal at `path`, loading whatever a previous run left behind.
    pub fn open(path: impl Into<PathBuf>) -> AnchorResult<Self> {
        let file_path = path.into();
        let mut records: VecDeque<ActionRecord> = if file_path.exists() {
            let content = std::fs::read_to_string(&file_path)?;
            if content.trim().is_empty() {
                VecDeque::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    AnchorError::Journal(format!("{}: {e}", file_path.display()))
                })?
            }
        } else {
            VecDeque::new()
        };

        while records.len() > JOURNAL_CAPACITY {
            records.pop_front();
        }

        tracing::debug!(path = %file_path.display(), steps = records.len(), "journal opened");
        Ok(Self { records, file_path })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn records(&self) -> impl Iterator<Item = &ActionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a step, evicting the oldest beyond capacity, and rewrites the file.
    pub fn record_step(&mut self, id: &str, view: &str) -> AnchorResult<()> {
        self.records.push_back(ActionRecord {
            id: id.to_string(),
            view: view.to_string(),
        });
        while self.records.len() > JOURNAL_CAPACITY {
            self.records.pop_front();
        }
        self.flush()
    }

    /// Replaces the file via a sibling temp file so a crash never leaves half a list.
    fn flush(&self) -> AnchorResult<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_string_pretty(&self.records)?;
        let tmp = self.file_path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.file_path)?;
        tracing::debug!(path = %self.file_path.display(), steps = self.records.len(), "journal flushed");
        Ok(())
    }

    /// Markdown recovery narrative for an agent (or LLM) resuming after a crash.
    pub fn resume_instructions(&self) -> String {
        if self.records.is_empty() {
            return "No history found. Start from the default entry point.".to_string();
        }

        let steps: Vec<String> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. Navigate to **{}** via **{}**", i + 1, step.view, step.id))
            .collect();

        [
            "## Recovery Playbook: Resuming Session".to_string(),
            "The following steps represent the last successful actions before the crash:".to_string(),
            steps.join("\n"),
            String::new(),
            "**Action Required:** Re-verify visual state at the last step before proceeding.".to_string(),
        ]
        .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_last_ten_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = HistoryJournal::open(dir.path().join("recovery_journal.json")).unwrap();
        for i in 0..11 {
            journal.record_step(&format!("step_{i}"), "Main").unwrap();
        }

        let ids: Vec<&str> = journal.records().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), 10);
        assert_eq!(ids.first(), Some(&"step_1"));
        assert_eq!(ids.last(), Some(&"step_10"));

        let on_disk: Vec<ActionRecord> =
            serde_json::from_str(&std::fs::read_to_string(journal.path()).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 10);
        assert_eq!(on_disk[0].id, "step_1");
    }

    #[test]
    fn reopening_restores_previous_steps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("recovery_journal.json");
        {
            let mut journal = HistoryJournal::open(&path).unwrap();
            journal.record_step("username", "Login").unwrap();
            journal.record_step("submit", "Login").unwrap();
        }

        let journal = HistoryJournal::open(&path).unwrap();
        assert_eq!(
            journal.records().cloned().collect::<Vec<_>>(),
            vec![
                ActionRecord { id: "username".into(), view: "Login".into() },
                ActionRecord { id: "submit".into(), view: "Login".into() },
            ]
        );
    }

    #[test]
    fn resume_instructions_render_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = HistoryJournal::open(dir.path().join("j.json")).unwrap();
        assert_eq!(
            journal.resume_instructions(),
            "No history found. Start from the default entry point."
        );

        journal.record_step("username", "Login").unwrap();
        journal.record_step("save", "Settings").unwrap();
        let text = journal.resume_instructions();
        assert!(text.starts_with("## Recovery Playbook"));
        assert!(text.contains("1. Navigate to **Login** via **username**\n2. Navigate to **Settings** via **save**"));
        assert!(text.ends_with("before proceeding."));
    }

    #[test]
    fn corrupt_journal_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(HistoryJournal::open(&path), Err(AnchorError::Journal(_))));
    }
}
