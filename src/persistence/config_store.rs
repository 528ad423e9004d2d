//! Config file store (spec §4.3, §6): line-preserving CSV of [`Rule`]s.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::persistence::atomic::write_atomically;
use crate::rule::{Direction, EnabledState, Rule, ThresholdType};

/// Column order mandated by spec §6; the last two are optional.
pub const HEADER: &str =
    "id,pair,threshold_price,threshold_type,direction,volume,trailing_offset_percent,enabled,linked_order_id,account";

const COL_ID: usize = 0;
const COL_PAIR: usize = 1;
const COL_THRESHOLD_PRICE: usize = 2;
const COL_THRESHOLD_TYPE: usize = 3;
const COL_DIRECTION: usize = 4;
const COL_VOLUME: usize = 5;
const COL_OFFSET: usize = 6;
const COL_ENABLED: usize = 7;
const COL_LINKED_ORDER_ID: usize = 8;
const COL_ACCOUNT: usize = 9;

/// One non-header line of a config file.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigLine {
    /// A data row. `fields` holds the raw cell text exactly as read, so an
    /// unmodified row round-trips byte-for-byte; `parsed` is `Some` only when
    /// every required cell typechecked.
    Record { fields: Vec<String>, parsed: Option<Rule> },
    /// A `#`-prefixed line, preserved verbatim.
    Comment(String),
    /// A blank line, preserved as a position marker.
    Blank,
}

impl ConfigLine {
    /// The row id, if this is a record with a non-empty `id` cell.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            ConfigLine::Record { fields, .. } => fields.get(COL_ID).map(String::as_str),
            _ => None,
        }
    }
}

/// An in-memory, line-preserving view of a config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigDocument {
    lines: Vec<ConfigLine>,
}

impl ConfigDocument {
    /// Parse `text` (the full file contents, header included) into a document.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut lines = Vec::new();
        for raw_line in text.lines().skip(1) {
            let trimmed = raw_line.trim();
            if trimmed.is_empty() {
                lines.push(ConfigLine::Blank);
            } else if trimmed.starts_with('#') {
                lines.push(ConfigLine::Comment(raw_line.to_owned()));
            } else {
                let fields = split_csv_line(raw_line);
                let parsed = parse_rule(&fields);
                lines.push(ConfigLine::Record { fields, parsed });
            }
        }
        Self { lines }
    }

    /// Every record line's parsed [`Rule`], skipping comments, blanks and
    /// rows that failed to parse at all.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.lines.iter().filter_map(|l| match l {
            ConfigLine::Record { parsed: Some(rule), .. } => Some(rule),
            _ => None,
        })
    }

    /// All record lines, parsed or not, for the validator to walk.
    #[must_use]
    pub fn lines(&self) -> &[ConfigLine] {
        &self.lines
    }

    /// Rewrite the `enabled` cell for the row with id `id` to `state`,
    /// leaving every other cell untouched (spec §4.3 disabling-on-error, §4.4.3 chain).
    pub fn set_enabled(&mut self, id: &str, state: EnabledState) -> bool {
        for line in &mut self.lines {
            if let ConfigLine::Record { fields, parsed } = line {
                if fields.get(COL_ID).map(String::as_str) == Some(id) {
                    if fields.len() <= COL_ENABLED {
                        fields.resize(COL_ENABLED + 1, String::new());
                    }
                    fields[COL_ENABLED] = state.to_string();
                    *parsed = parse_rule(fields);
                    return true;
                }
            }
        }
        false
    }

    /// Render the document back to file text, header first.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for line in &self.lines {
            match line {
                ConfigLine::Record { fields, .. } => {
                    out.push_str(&join_csv_line(fields));
                    out.push('\n');
                }
                ConfigLine::Comment(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
                ConfigLine::Blank => out.push('\n'),
            }
        }
        out
    }
}

fn parse_rule(fields: &[String]) -> Option<Rule> {
    let id = fields.get(COL_ID)?.trim();
    if id.is_empty() {
        return None;
    }
    let pair = fields.get(COL_PAIR)?.trim();
    if pair.is_empty() {
        return None;
    }
    let threshold_price: Decimal = fields.get(COL_THRESHOLD_PRICE)?.trim().parse().ok()?;
    let threshold_type: ThresholdType = fields.get(COL_THRESHOLD_TYPE)?.trim().parse().ok()?;
    let direction: Direction = fields.get(COL_DIRECTION)?.trim().parse().ok()?;
    let volume: Decimal = fields.get(COL_VOLUME)?.trim().parse().ok()?;
    let trailing_offset_percent: Decimal = fields.get(COL_OFFSET)?.trim().parse().ok()?;
    let enabled: EnabledState = fields.get(COL_ENABLED)?.trim().parse().ok()?;
    let linked_order_id = fields
        .get(COL_LINKED_ORDER_ID)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_owned);
    let account = fields
        .get(COL_ACCOUNT)
        .map(|s| s.trim().to_owned())
        .unwrap_or_default();

    Some(Rule {
        id: id.to_owned(),
        pair: pair.to_owned(),
        threshold_price,
        threshold_type,
        direction,
        volume,
        trailing_offset_percent,
        enabled,
        linked_order_id,
        account,
    })
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

/// Load a config document from disk, or an empty one if the file does not yet exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub async fn load(path: &Path) -> Result<ConfigDocument> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(ConfigDocument::parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigDocument::default()),
        Err(e) => Err(e).with_context(|| format!("reading config file {}", path.display())),
    }
}

/// Persist `doc` to `path` via the atomic-write protocol.
///
/// # Errors
///
/// Returns an error if the underlying atomic write fails after retries.
pub async fn save(path: &Path, doc: &ConfigDocument) -> Result<()> {
    write_atomically(path, &doc.render()).await
}

/// Write a small annotated template config, used by `--create-sample-config` (spec §4.8).
#[must_use]
pub fn sample_template() -> String {
    format!(
        "{HEADER}\n\
         # Example: sell 0.5 BTC once price rises to 70000 USD, trailing 2%\n\
         example-sell-high,XXBTZUSD,70000,above,sell,0.5,2.0,false,,primary\n\
         # Example: buy back 0.5 BTC once price falls to 55000 USD, trailing 1.5%\n\
         example-buy-low,XXBTZUSD,55000,below,buy,0.5,1.5,false,,primary\n"
    )
}

/// Default path for the config file, relative to the process's working directory.
#[must_use]
pub fn default_path() -> PathBuf {
    PathBuf::from("ttslo_config.csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn preserves_comments_and_blanks_on_round_trip() {
        let text = format!(
            "{HEADER}\n# a comment\n\nr1,XXBTZUSD,70000,above,sell,0.5,2.0,true,,primary\n"
        );
        let doc = ConfigDocument::parse(&text);
        assert_eq!(doc.render(), text);
    }

    #[test]
    fn set_enabled_only_touches_the_enabled_cell() {
        let text = format!("{HEADER}\nr1,XXBTZUSD,70000,above,sell,0.5,2.0,true,,primary\n");
        let mut doc = ConfigDocument::parse(&text);
        assert!(doc.set_enabled("r1", EnabledState::False));
        let rule = doc.rules().next().unwrap();
        assert_eq!(rule.enabled, EnabledState::False);
        assert_eq!(rule.threshold_price, dec!(70000));
    }

    #[test]
    fn malformed_row_parses_to_none_but_is_preserved() {
        let text = format!("{HEADER}\nr1,XXBTZUSD,notanumber,above,sell,0.5,2.0,true,,primary\n");
        let doc = ConfigDocument::parse(&text);
        assert_eq!(doc.rules().count(), 0);
        assert_eq!(doc.render(), text);
    }
}
