//! State file store (spec §4.3, §6): line-preserving CSV of [`RuleState`]s.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::persistence::atomic::write_atomically;
use crate::rule::RuleState;

/// Column order mandated by spec §6.
pub const HEADER: &str =
    "id,triggered,trigger_price,trigger_time,order_id,offset,last_checked,fill_notified,activated_on,last_error,error_notified";

const COL_ID: usize = 0;
const COL_TRIGGERED: usize = 1;
const COL_TRIGGER_PRICE: usize = 2;
const COL_TRIGGER_TIME: usize = 3;
const COL_ORDER_ID: usize = 4;
const COL_OFFSET: usize = 5;
const COL_LAST_CHECKED: usize = 6;
const COL_FILL_NOTIFIED: usize = 7;
const COL_ACTIVATED_ON: usize = 8;
const COL_LAST_ERROR: usize = 9;
const COL_ERROR_NOTIFIED: usize = 10;
const NUM_COLS: usize = 11;

/// One non-header line of a state file.
#[derive(Debug, Clone, PartialEq)]
pub enum StateLine {
    /// A data row keyed by rule id.
    Record { id: String, state: RuleState },
    /// A `#`-prefixed line, preserved verbatim.
    Comment(String),
    /// A blank line.
    Blank,
}

/// An in-memory, line-preserving view of a state file.
#[derive(Debug, Clone, Default)]
pub struct StateDocument {
    lines: Vec<StateLine>,
}

impl StateDocument {
    /// Parse `text` (full file contents, header included).
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut lines = Vec::new();
        for raw_line in text.lines().skip(1) {
            let trimmed = raw_line.trim();
            if trimmed.is_empty() {
                lines.push(StateLine::Blank);
            } else if trimmed.starts_with('#') {
                lines.push(StateLine::Comment(raw_line.to_owned()));
            } else {
                let fields = split_csv_line(raw_line);
                if let Some((id, state)) = parse_state_row(&fields) {
                    lines.push(StateLine::Record { id, state });
                }
            }
        }
        Self { lines }
    }

    /// Look up the state for `id`, if a row for it exists.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RuleState> {
        self.lines.iter().find_map(|l| match l {
            StateLine::Record { id: row_id, state } if row_id == id => Some(state),
            _ => None,
        })
    }

    /// Insert or replace the state row for `id`.
    pub fn upsert(&mut self, id: &str, state: RuleState) {
        for line in &mut self.lines {
            if let StateLine::Record { id: row_id, state: existing } = line {
                if row_id == id {
                    *existing = state;
                    return;
                }
            }
        }
        self.lines.push(StateLine::Record { id: id.to_owned(), state });
    }

    /// Iterate every known `(id, state)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RuleState)> {
        self.lines.iter().filter_map(|l| match l {
            StateLine::Record { id, state } => Some((id.as_str(), state)),
            _ => None,
        })
    }

    /// Render the document back to file text, header first.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for line in &self.lines {
            match line {
                StateLine::Record { id, state } => {
                    out.push_str(&render_state_row(id, state));
                    out.push('\n');
                }
                StateLine::Comment(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
                StateLine::Blank => out.push('\n'),
            }
        }
        out
    }
}

fn opt_decimal(s: &str) -> Option<Decimal> {
    if s.trim().is_empty() {
        None
    } else {
        s.trim().parse().ok()
    }
}

fn opt_datetime(s: &str) -> Option<DateTime<Utc>> {
    if s.trim().is_empty() {
        None
    } else {
        DateTime::parse_from_rfc3339(s.trim()).ok().map(|d| d.with_timezone(&Utc))
    }
}

fn parse_state_row(fields: &[String]) -> Option<(String, RuleState)> {
    let id = fields.get(COL_ID)?.trim();
    if id.is_empty() {
        return None;
    }
    let state = RuleState {
        triggered: fields.get(COL_TRIGGERED).map(|s| s.trim() == "true").unwrap_or(false),
        trigger_price: fields.get(COL_TRIGGER_PRICE).and_then(|s| opt_decimal(s)),
        trigger_time: fields.get(COL_TRIGGER_TIME).and_then(|s| opt_datetime(s)),
        order_id: fields.get(COL_ORDER_ID).map(|s| s.trim().to_owned()).unwrap_or_default(),
        offset: fields.get(COL_OFFSET).and_then(|s| opt_decimal(s)),
        last_checked: fields.get(COL_LAST_CHECKED).and_then(|s| opt_datetime(s)),
        fill_notified: fields.get(COL_FILL_NOTIFIED).map(|s| s.trim() == "true").unwrap_or(false),
        activated_on: fields.get(COL_ACTIVATED_ON).and_then(|s| opt_datetime(s)),
        last_error: fields.get(COL_LAST_ERROR).map(|s| s.trim().to_owned()).unwrap_or_default(),
        error_notified: fields
            .get(COL_ERROR_NOTIFIED)
            .map(|s| s.trim() == "true")
            .unwrap_or(false),
    };
    Some((id.to_owned(), state))
}

fn render_state_row(id: &str, state: &RuleState) -> String {
    let mut fields = vec![String::new(); NUM_COLS];
    fields[COL_ID] = id.to_owned();
    fields[COL_TRIGGERED] = state.triggered.to_string();
    fields[COL_TRIGGER_PRICE] = state.trigger_price.map(|d| d.to_string()).unwrap_or_default();
    fields[COL_TRIGGER_TIME] = state.trigger_time.map(|t| t.to_rfc3339()).unwrap_or_default();
    fields[COL_ORDER_ID] = state.order_id.clone();
    fields[COL_OFFSET] = state.offset.map(|d| d.to_string()).unwrap_or_default();
    fields[COL_LAST_CHECKED] = state.last_checked.map(|t| t.to_rfc3339()).unwrap_or_default();
    fields[COL_FILL_NOTIFIED] = state.fill_notified.to_string();
    fields[COL_ACTIVATED_ON] = state.activated_on.map(|t| t.to_rfc3339()).unwrap_or_default();
    fields[COL_LAST_ERROR] = state.last_error.clone();
    fields[COL_ERROR_NOTIFIED] = state.error_notified.to_string();
    join_csv_line(&fields)
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(str::to_owned).collect(),
        _ => vec![],
    }
}

fn join_csv_line(fields: &[String]) -> String {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(vec![]);
    writer.write_record(fields).expect("writing to an in-memory buffer cannot fail");
    let bytes = writer.into_inner().expect("buffer flush cannot fail");
    String::from_utf8(bytes)
        .expect("csv writer emits valid utf8 for utf8 input")
        .trim_end_matches('\n')
        .to_owned()
}

/// Load a state document from disk, or an empty one if the file does not yet exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub async fn load(path: &Path) -> Result<StateDocument> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(StateDocument::parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateDocument::default()),
        Err(e) => Err(e).with_context(|| format!("reading state file {}", path.display())),
    }
}

/// Persist `doc` to `path` via the atomic-write protocol.
///
/// # Errors
///
/// Returns an error if the underlying atomic write fails after retries.
pub async fn save(path: &Path, doc: &StateDocument) -> Result<()> {
    write_atomically(path, &doc.render()).await
}

/// Default path for the state file.
#[must_use]
pub fn default_path() -> PathBuf {
    PathBuf::from("ttslo_state.csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trips_a_populated_row() {
        let mut doc = StateDocument::default();
        let mut state = RuleState::default();
        state.triggered = true;
        state.trigger_price = Some(dec!(70000.5));
        state.order_id = "OABC-123".to_owned();
        doc.upsert("r1", state.clone());

        let rendered = doc.render();
        let reparsed = StateDocument::parse(&rendered);
        let round_tripped = reparsed.get("r1").unwrap();
        assert_eq!(round_tripped.triggered, true);
        assert_eq!(round_tripped.trigger_price, Some(dec!(70000.5)));
        assert_eq!(round_tripped.order_id, "OABC-123");
    }

    #[test]
    fn preserves_comments_and_blanks() {
        let text = format!("{HEADER}\n# note\n\n");
        let doc = StateDocument::parse(&text);
        assert_eq!(doc.render(), text);
    }
}
