// Writes each channel's ranking to a weekly JSON score report.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use directories::ProjectDirs;
use tracing::info;
use trivia_cli::export::{self, ExportArgs, ScoreFile};
use trivia_core::config;
use trivia_core::sqlite::SqliteStore;
use trivia_core::store::ScoreStore;

fn main() -> anyhow::Result<()> {
    trivia_cli::init_tracing("trivia-export.log")?;

    let args = ExportArgs::parse();
    let outdir = args.outdir_or(
        ProjectDirs::from("", "", "trivia")
            .map(|dirs| dirs.data_dir().join("scores"))
            .unwrap_or_else(|| PathBuf::from("scores")),
    );

    let config = config::load_config().context("failed to load configuration")?;
    let store = SqliteStore::open(&config.db_path).context("failed to open score store")?;

    std::fs::create_dir_all(&outdir)
        .with_context(|| format!("failed to create {}", outdir.display()))?;

    let now = Utc::now();
    let week = export::week_key(now, args.week);
    info!("Exporting week {} to {}", week, outdir.display());

    let channels = store.channels().context("failed to list channels")?;
    for (channel_id, name) in &channels {
        let current = store
            .channel_ranking(channel_id, 0)
            .with_context(|| format!("failed to read ranking of {channel_id}"))?;

        let path = outdir.join(export::file_name(channel_id));
        let mut file = export::read_score_file(&path)?
            .unwrap_or_else(|| ScoreFile::new(channel_id.as_str(), now));
        file.record_week(&week, current, now);
        export::write_score_file(&path, &file)?;

        if args.reset {
            store
                .reset_channel_ranking(channel_id)
                .with_context(|| format!("failed to reset ranking of {channel_id}"))?;
        }
        info!("Exported {} ({}), {} players", channel_id, name, file.total.len());
        println!("{channel_id}: {}", path.display());
    }

    println!("Exported {} channels for week {week}", channels.len());
    Ok(())
}
