use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;

use shuati_grader::commands::{self, AppState};
use shuati_grader::{init_logging, CancelToken, GraderConfig};

#[derive(Parser)]
#[command(author, version, about = "刷题判题流水线", long_about = None)]
struct Cli {
    /// 题库 JSON 文件
    #[arg(long, env = "SHUATI_CATALOG_PATH")]
    catalog: Option<PathBuf>,
    /// 进度数据库文件
    #[arg(long, env = "SHUATI_DB_PATH")]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a submission against every test case of a question
    Grade {
        #[arg(long)]
        user: String,
        #[arg(long)]
        question: String,
        /// Source file to submit
        #[arg(long)]
        file: PathBuf,
    },
    /// Run code once with custom input
    Run {
        #[arg(long, default_value = "python")]
        language: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "")]
        stdin: String,
    },
    /// Show a user's progress, or one topic's badge standing
    Progress {
        #[arg(long)]
        user: String,
        #[arg(long)]
        topic: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = GraderConfig::from_env();
    if let Some(catalog) = cli.catalog {
        config.catalog_path = catalog;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    init_logging(&config)?;

    let state = AppState::from_config(config)?;

    // Ctrl-C 取消正在进行的判题
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Grade {
            user,
            question,
            file,
        } => {
            let source = read_source(&file)?;
            let outcome = commands::grade_submission(&state, user, question, source, Some(cancel))
                .await
                .map_err(anyhow::Error::msg)?;
            info!("{}", outcome.message);
            print_json(&outcome)?;
        }
        Commands::Run {
            language,
            file,
            stdin,
        } => {
            let source = read_source(&file)?;
            let result = commands::run_code(&state, source, language, stdin, Some(cancel))
                .await
                .map_err(anyhow::Error::msg)?;
            print_json(&result)?;
        }
        Commands::Progress { user, topic } => match topic {
            Some(topic) => {
                let summary = commands::get_topic_progress(&state, user, topic)
                    .await
                    .map_err(anyhow::Error::msg)?;
                print_json(&summary)?;
            }
            None => {
                let progress = commands::get_user_progress(&state, user)
                    .await
                    .map_err(anyhow::Error::msg)?;
                print_json(&progress)?;
            }
        },
    }

    Ok(())
}
