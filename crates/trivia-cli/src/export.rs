// Weekly score reports written by `trivia-export`.
//
// Each channel has one JSON file holding its all-time total and a per-week
// breakdown. A channel's live ranking in the store is the current week's
// score; re-exporting the same week replaces that week's entry and corrects
// the total by the difference.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Datelike, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use trivia_core::rank::Rank;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreFile {
    pub channel_id: String,
    pub last_updated: DateTime<Utc>,
    pub total: Rank,
    /// Week key (`YYYY-W`) to that week's ranking.
    pub rank: BTreeMap<String, Rank>,
}

impl ScoreFile {
    pub fn new(channel_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            channel_id: channel_id.into(),
            last_updated: now,
            total: Rank::new(),
            rank: BTreeMap::new(),
        }
    }

    /// Record `current` as the ranking for `week`, replacing any earlier
    /// export of the same week in the total.
    pub fn record_week(&mut self, week: &str, current: Rank, now: DateTime<Utc>) {
        let previous = self.rank.get(week).cloned().unwrap_or_default();
        self.total = self.total.subtract(&previous).add(&current);
        self.rank.insert(week.to_string(), current);
        self.last_updated = now;
    }
}

/// ISO week key for `now`, or for week `week` of the same ISO year.
pub fn week_key(now: DateTime<Utc>, week: Option<u32>) -> String {
    let iso = now.iso_week();
    format!("{}-{}", iso.year(), week.unwrap_or(iso.week()))
}

/// File name for a channel's report. Anything outside `[A-Za-z0-9_-]` is
/// replaced so channel ids cannot escape the output directory.
pub fn file_name(channel_id: &str) -> String {
    let safe: String = channel_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}.json")
}

pub fn read_score_file(path: &Path) -> anyhow::Result<Option<ScoreFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(file))
}

pub fn write_score_file(path: &Path, file: &ScoreFile) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(file)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Write each channel's ranking to a weekly JSON score report.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "trivia-export", version)]
pub struct ExportArgs {
    /// Directory for the per-channel report files
    #[arg(long)]
    pub outdir: Option<PathBuf>,

    /// ISO week number to record under (defaults to the current week)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=53))]
    pub week: Option<u32>,

    /// Clear each channel's live ranking after exporting it
    #[arg(long)]
    pub reset: bool,
}

impl ExportArgs {
    /// The output directory, or `default` when none was given.
    pub fn outdir_or(&self, default: PathBuf) -> PathBuf {
        self.outdir.clone().unwrap_or(default)
    }
}
