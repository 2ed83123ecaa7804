//! Raw editor events → canonical [`ActivityRecord`]s
//!
//! Every integration reports events under its own names: VS Code document
//! events, Vim autocommands, browser extension messages. The normalizer folds
//! those onto [`ActivityKind`] and lifts the few payload fields the engine
//! understands into well-known metadata keys. Unknown kinds become
//! [`ActivityKind::Other`] so an instrumentation gap never stops capture.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActivityKind, ActivityRecord, Metadata, META_FILE, META_LINE_DELTA, META_RAW_KIND};

/// An event as an integration reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Editor-specific event name
    #[serde(alias = "type", alias = "event")]
    pub kind: String,

    /// When the editor saw it; filled with "now" if absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Anything else the integration attached
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RawEvent {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            timestamp: None,
            payload,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Payload keys that name the touched file, in priority order
const FILE_KEYS: &[&str] = &[
    "file", "file_path", "filePath", "path", "fileName", "uri", "buffer", "bufname",
];

/// Stamps raw events with the owning session and canonicalises them
#[derive(Debug, Clone)]
pub struct Normalizer {
    session_id: String,
}

impl Normalizer {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Normalize against the wall clock.
    ///
    /// Missing timestamps become "now", and timestamps ahead of the wall clock
    /// are pulled back to it.
    pub fn normalize(&self, raw: RawEvent) -> ActivityRecord {
        let now = Utc::now();
        let mut record = self.normalize_at(raw, now);
        if record.timestamp > now {
            tracing::debug!(
                kind = %record.kind,
                ahead_ms = (record.timestamp - now).num_milliseconds(),
                "Event timestamp ahead of the clock, using now"
            );
            record.timestamp = now;
        }
        record
    }

    /// Normalize with an explicit fallback timestamp; reported timestamps are kept
    pub fn normalize_at(&self, raw: RawEvent, now: DateTime<Utc>) -> ActivityRecord {
        let kind = map_kind(&raw.kind);
        let timestamp = raw.timestamp.unwrap_or(now);
        let mut metadata = Metadata::new();

        match raw.payload {
            serde_json::Value::Object(fields) => {
                if let Some(file) = extract_file(&fields) {
                    metadata.insert(META_FILE.to_string(), file.into());
                }
                if let Some(delta) = extract_line_delta(&fields) {
                    metadata.insert(META_LINE_DELTA.to_string(), delta.into());
                }
                for (key, value) in fields {
                    metadata.entry(key).or_insert(value);
                }
            }
            serde_json::Value::Null => {}
            other => {
                metadata.insert("payload".to_string(), other);
            }
        }

        if kind == ActivityKind::TestRun && !metadata.contains_key("passed") {
            if let Some(passed) = infer_test_outcome(&raw.kind, &metadata) {
                metadata.insert("passed".to_string(), passed.into());
            }
        }

        metadata.insert(META_RAW_KIND.to_string(), raw.kind.into());

        ActivityRecord {
            kind,
            session_id: self.session_id.clone(),
            timestamp,
            metadata,
        }
    }
}

/// Fold an editor-specific event name onto the canonical taxonomy
pub fn map_kind(raw: &str) -> ActivityKind {
    let key = raw.trim().to_ascii_lowercase().replace('-', "_");
    match key.as_str() {
        "edit" | "keystroke" | "text_change" | "file_edit" | "file_modified"
        | "textdocument/didchange" | "ondidchangetextdocument" | "textchanged"
        | "textchangedi" | "textchangedp" | "insertcharpre" => ActivityKind::Edit,

        "save" | "file_saved" | "textdocument/didsave" | "ondidsavetextdocument"
        | "bufwrite" | "bufwritepost" => ActivityKind::Save,

        "mode_change" | "modechanged" | "insertenter" | "insertleave" => {
            ActivityKind::ModeChange
        }

        "command" | "command_executed" | "code_executed" | "terminal_command"
        | "cmdlineleave" => ActivityKind::Command,

        "search" | "find" | "search_performed" | "searchwrapped" => ActivityKind::Search,

        "file_open" | "file_created" | "textdocument/didopen" | "ondidopentextdocument"
        | "bufread" | "bufreadpost" | "bufnewfile" => ActivityKind::FileOpen,

        "focus_change" | "editor_focus" | "editor_blur" | "ondidchangeactivetexteditor"
        | "bufenter" | "focusgained" | "focuslost" | "tab_switch" | "window_focus" => {
            ActivityKind::FocusChange
        }

        "test_run" | "test_pass" | "test_fail" | "tests_finished" => ActivityKind::TestRun,

        "commit" | "commit_created" | "git_commit" => ActivityKind::Commit,

        _ => ActivityKind::Other,
    }
}

fn extract_file(fields: &Metadata) -> Option<String> {
    FILE_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn extract_line_delta(fields: &Metadata) -> Option<i64> {
    if let Some(delta) = fields
        .get("line_delta")
        .or_else(|| fields.get("lineDelta"))
        .and_then(|v| v.as_i64())
    {
        return Some(delta);
    }

    let added = fields.get("lines_added").and_then(|v| v.as_i64());
    let removed = fields.get("lines_removed").and_then(|v| v.as_i64());
    match (added, removed) {
        (None, None) => None,
        (a, r) => Some(a.unwrap_or(0) - r.unwrap_or(0)),
    }
}

fn infer_test_outcome(raw_kind: &str, metadata: &Metadata) -> Option<bool> {
    match raw_kind.trim().to_ascii_lowercase().as_str() {
        "test_pass" => Some(true),
        "test_fail" => Some(false),
        _ => metadata
            .get("success")
            .and_then(|v| v.as_bool())
            .or_else(|| metadata.get("failed").and_then(|v| v.as_u64()).map(|n| n == 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> Normalizer {
        Normalizer::new("session-1")
    }

    #[test]
    fn test_editor_aliases_map_to_canonical_kinds() {
        assert_eq!(map_kind("textDocument/didChange"), ActivityKind::Edit);
        assert_eq!(map_kind("TextChangedI"), ActivityKind::Edit);
        assert_eq!(map_kind("BufWritePost"), ActivityKind::Save);
        assert_eq!(map_kind("mode-change"), ActivityKind::ModeChange);
        assert_eq!(map_kind("command_executed"), ActivityKind::Command);
        assert_eq!(map_kind("editor_focus"), ActivityKind::FocusChange);
        assert_eq!(map_kind("commit_created"), ActivityKind::Commit);
    }

    #[test]
    fn test_unknown_kind_becomes_other() {
        let record = normalizer().normalize(RawEvent::new("hover_shown", json!({"x": 1})));
        assert_eq!(record.kind, ActivityKind::Other);
        assert_eq!(record.metadata[META_RAW_KIND], "hover_shown");
        assert_eq!(record.metadata["x"], 1);
    }

    #[test]
    fn test_extracts_file_and_line_delta() {
        let raw = RawEvent::new(
            "ondidchangetextdocument",
            json!({"filePath": "/src/main.rs", "lines_added": 4, "lines_removed": 1}),
        );
        let record = normalizer().normalize(raw);

        assert_eq!(record.kind, ActivityKind::Edit);
        assert_eq!(record.session_id, "session-1");
        assert_eq!(record.file(), Some("/src/main.rs"));
        assert_eq!(record.line_delta(), 3);
    }

    #[test]
    fn test_missing_timestamp_uses_fallback() {
        let now = Utc::now();
        let record = normalizer().normalize_at(RawEvent::new("save", json!(null)), now);
        assert_eq!(record.timestamp, now);

        let earlier = now - chrono::Duration::seconds(5);
        let record = normalizer().normalize_at(RawEvent::new("save", json!(null)).at(earlier), now);
        assert_eq!(record.timestamp, earlier);
    }

    #[test]
    fn test_future_timestamp_is_pulled_back_to_now() {
        let ahead = Utc::now() + chrono::Duration::hours(1);
        let record = normalizer().normalize(RawEvent::new("edit", json!(null)).at(ahead));
        let after = Utc::now();
        assert!(record.timestamp <= after);
        assert!(record.timestamp < ahead);

        let past = Utc::now() - chrono::Duration::minutes(2);
        let record = normalizer().normalize(RawEvent::new("edit", json!(null)).at(past));
        assert_eq!(record.timestamp, past);
    }

    #[test]
    fn test_scalar_payload_is_kept() {
        let record = normalizer().normalize(RawEvent::new("search", json!("needle")));
        assert_eq!(record.kind, ActivityKind::Search);
        assert_eq!(record.metadata["payload"], "needle");
    }

    #[test]
    fn test_test_outcome_is_inferred() {
        let passed = normalizer().normalize(RawEvent::new("test_pass", json!({})));
        assert_eq!(passed.metadata["passed"], true);

        let failed = normalizer().normalize(RawEvent::new("test_run", json!({"failed": 2})));
        assert_eq!(failed.metadata["passed"], false);

        let explicit = normalizer().normalize(RawEvent::new("test_fail", json!({"passed": true})));
        assert_eq!(explicit.metadata["passed"], true);
    }

    #[test]
    fn test_raw_event_deserializes_with_type_alias() {
        let raw: RawEvent = serde_json::from_str(
            r#"{"type": "save", "timestamp": "2025-01-01T10:00:00Z", "payload": {"file": "a.rs"}}"#,
        )
        .unwrap();
        assert_eq!(raw.kind, "save");
        assert!(raw.timestamp.is_some());
    }
}
