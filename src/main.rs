use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use gtfs_import::{
    pipeline::{self, StoreConfig},
    ImportOptions, ImportReport, ProgressSink, SilentProgress, TerminalProgress,
};

#[derive(Parser, Debug)]
#[command(version, about = "Load a GTFS feed into a SQLite database")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download (or take a local archive), extract and import a feed.
    Run {
        /// URL or local path of the feed zip archive.
        #[arg(long, env = "GTFS_URL")]
        source: String,
        /// Where a downloaded archive is stored.
        #[arg(long, default_value = "gtfs.zip")]
        archive: PathBuf,
        /// Directory the archive is extracted into.
        #[arg(long, default_value = "gtfs")]
        feed_dir: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Import an already extracted feed directory.
    Load {
        feed_dir: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Args, Debug)]
struct StoreArgs {
    #[arg(long, default_value = "data.db")]
    database: PathBuf,
    /// Rows grouped into one INSERT statement.
    #[arg(long, default_value_t = 100)]
    rows_per_statement: usize,
    /// Skip counting lines to size the progress bars.
    #[arg(long)]
    no_count: bool,
    #[arg(long)]
    no_progress: bool,
    /// Import into the existing tables instead of recreating them.
    #[arg(long)]
    keep_schema: bool,
    /// Write a JSON summary of the import to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl StoreArgs {
    fn config(&self) -> StoreConfig {
        StoreConfig {
            database: self.database.clone(),
            reset_schema: !self.keep_schema,
            options: ImportOptions {
                rows_per_statement: self.rows_per_statement,
                count_rows: !self.no_count,
            },
        }
    }

    fn progress(&self) -> Box<dyn ProgressSink> {
        if self.no_progress {
            Box::new(SilentProgress)
        } else {
            Box::new(TerminalProgress::new())
        }
    }
}

fn write_report(report: &ImportReport, path: &Path) -> Result<()> {
    log::info!("Writing report to {:?}", path);
    let mut file = std::fs::File::create(path)?;
    file.write_all(serde_json::to_string_pretty(report)?.as_bytes())?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()?;

    let (report, store) = match &cli.command {
        Command::Run {
            source,
            archive,
            feed_dir,
            store,
        } => {
            let mut progress = store.progress();
            let report =
                pipeline::run(source, archive, feed_dir, &store.config(), progress.as_mut()).await?;
            (report, store)
        }
        Command::Load { feed_dir, store } => {
            let mut progress = store.progress();
            let report = pipeline::load(feed_dir, &store.config(), progress.as_mut()).await?;
            (report, store)
        }
    };

    for table in &report.tables {
        log::info!("{}: {} records", table.source_file, table.records);
    }
    if let Some(path) = &store.report {
        write_report(&report, path)?;
    }
    Ok(())
}
