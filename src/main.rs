use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;

use tribox::classifier::llm::LlmClassifier;
use tribox::mail_store::fetch::FetchFilter;
use tribox::mail_store::folders::build_categories;
use tribox::mail_store::imap::ImapStore;
use tribox::mail_store::{MailStore, RealClock};
use tribox::settings::{self, Config};
use tribox::sorter::{ClassifyTuning, SortReport, SortScope, Sorter};

#[derive(Parser)]
#[command(name = "tribox", about = "Sort mailbox folders with an LLM classifier")]
struct Cli {
    /// Path to the YAML settings file
    #[arg(short, long, default_value = "settings.yaml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify and relocate unread messages
    SortUnread {
        /// Source folder (defaults to the configured one)
        #[arg(long)]
        folder: Option<String>,
        /// Sweep every folder instead of one
        #[arg(long)]
        all_folders: bool,
        /// Only consider mail received today
        #[arg(long)]
        today: bool,
    },
    /// Classify and relocate all messages, read or not
    SortAll {
        #[arg(long)]
        folder: Option<String>,
        #[arg(long)]
        all_folders: bool,
        #[arg(long)]
        today: bool,
    },
    /// Move every message of a folder into one category, no classification
    SortInto {
        #[arg(long)]
        folder: String,
        #[arg(long)]
        category: String,
    },
    /// Show the categories derived from the mailbox folders
    Folders,
}

fn setup_logger(verbose: u8) -> Result<(), fern::InitError> {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("reqwest", LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

fn build_filter(config: &Config, unread_only: bool, today: bool) -> FetchFilter {
    let filter = if unread_only {
        FetchFilter::unread()
    } else {
        FetchFilter::all()
    };
    let filter = if today { filter.today(&RealClock) } else { filter };
    filter.with_limit(config.sorter.fetch_limit)
}

fn build_scope(config: &Config, folder: Option<String>, all_folders: bool) -> SortScope {
    if all_folders {
        SortScope::AllFolders
    } else {
        SortScope::Folder(folder.unwrap_or_else(|| config.sorter.source_folder.clone()))
    }
}

fn print_report(report: &SortReport) {
    if report.counts.is_empty() && report.failed_categories.is_empty() {
        println!("Nothing to sort.");
        return;
    }
    for (category, count) in &report.counts {
        println!("{}: {}", category, count);
    }
    for category in &report.failed_categories {
        println!("{}: failed, left in place", category);
    }
    println!("Total moved: {}", report.total_moved());
}

async fn show_folders(mut store: ImapStore, config: &Config) -> Result<()> {
    store.connect().await?;
    let source = config.sorter.category_source();
    let categories =
        build_categories(&mut store, &source, &config.sorter.fallback_category).await;
    store.disconnect().await;

    for category in &categories {
        println!("{}", category.name());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logger(cli.verbose)?;

    let config = settings::load_settings(&cli.config)?;

    let password = match &config.imap.password {
        Some(password) => password.clone(),
        None => rpassword::prompt_password(format!("Password for {}: ", config.imap.username))?,
    };
    let store = ImapStore::new(config.imap.clone(), password);

    match cli.command {
        Command::Folders => show_folders(store, &config).await?,
        Command::SortUnread {
            folder,
            all_folders,
            today,
        } => {
            let filter = build_filter(&config, true, today);
            let scope = build_scope(&config, folder, all_folders);
            let mut sorter = make_sorter(store, &config)?;
            print_report(&sorter.sort(scope, filter).await?);
        }
        Command::SortAll {
            folder,
            all_folders,
            today,
        } => {
            let filter = build_filter(&config, false, today);
            let scope = build_scope(&config, folder, all_folders);
            let mut sorter = make_sorter(store, &config)?;
            print_report(&sorter.sort(scope, filter).await?);
        }
        Command::SortInto { folder, category } => {
            let mut sorter = make_sorter(store, &config)?;
            let moved = sorter.sort_into_category(&folder, &category).await?;
            println!("{}: {}", category, moved);
        }
    }

    Ok(())
}

fn make_sorter(store: ImapStore, config: &Config) -> Result<Sorter<ImapStore, LlmClassifier>> {
    let classifier = LlmClassifier::new(&config.classifier)?;
    Ok(Sorter::new(
        store,
        classifier,
        config.sorter.clone(),
        ClassifyTuning::from_config(&config.classifier),
    ))
}
