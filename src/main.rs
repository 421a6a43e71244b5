//! Inbox Bee 命令行入口
//!
//! 初始化日志、加载配置、构建编排器，按子命令执行；结果以 JSON 输出到 stdout。

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use inbox_bee::config::load_config_or_default;
use inbox_bee::tools::TicketPayload;
use inbox_bee::{observability, Orchestrator, ProcessOutcome};

#[derive(Debug, Parser)]
#[command(name = "inbox-bee", about = "Triage creator email and draft first-pass replies")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// 数据目录（inbox.csv / knowledge_base.csv / tickets.csv）
    #[arg(long = "data-dir", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full pipeline for one email
    Process { email_id: i64 },
    /// Process several emails (all inbox rows when no ids are given)
    Batch {
        email_ids: Vec<i64>,
        /// Keep processing after a failure and report per-email results
        #[arg(long = "keep-going")]
        keep_going: bool,
    },
    /// Run triage only and persist category/priority
    Triage { email_id: i64 },
    /// Query the knowledge base
    Search {
        query: String,
        /// 默认取 [retrieval].top_k
        #[arg(long = "top-k")]
        top_k: Option<usize>,
        /// 默认取 [retrieval].min_score
        #[arg(long = "min-score")]
        min_score: Option<f64>,
    },
    /// Log a ticket from a JSON payload
    Ticket { payload: String },
}

#[derive(Serialize)]
struct BatchItem {
    email_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<ProcessOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    observability::init();

    let cli = Cli::parse();
    let mut cfg = load_config_or_default(cli.config.clone());
    if let Some(dir) = cli.data_dir {
        cfg.app.data_dir = dir;
    }
    let orchestrator = Orchestrator::from_config(&cfg);

    match cli.cmd {
        Command::Process { email_id } => {
            let outcome = orchestrator
                .process_one(email_id)
                .with_context(|| format!("Failed to process email_id={}", email_id))?;
            print_json(&outcome)?;
        }
        Command::Batch {
            email_ids,
            keep_going,
        } => {
            let ids = if email_ids.is_empty() {
                None
            } else {
                Some(email_ids.as_slice())
            };
            if keep_going {
                let results = orchestrator
                    .process_batch_isolated(ids)
                    .context("Batch failed")?;
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                let items: Vec<BatchItem> = results
                    .into_iter()
                    .map(|(email_id, result)| match result {
                        Ok(outcome) => BatchItem {
                            email_id,
                            outcome: Some(outcome),
                            error: None,
                        },
                        Err(e) => BatchItem {
                            email_id,
                            outcome: None,
                            error: Some(e.to_string()),
                        },
                    })
                    .collect();
                print_json(&items)?;
                if failed > 0 {
                    bail!("{} email(s) failed", failed);
                }
            } else {
                let outcomes = orchestrator.process_batch(ids).context("Batch failed")?;
                print_json(&outcomes)?;
            }
        }
        Command::Triage { email_id } => {
            let result = orchestrator
                .triage_one(email_id)
                .with_context(|| format!("Failed to triage email_id={}", email_id))?;
            print_json(&result)?;
        }
        Command::Search {
            query,
            top_k,
            min_score,
        } => {
            let (top_k, min_score) = cfg.retrieval.search_limits(top_k, min_score);
            let hits = orchestrator
                .knowledge_base()
                .search(&query, top_k, min_score)
                .context("KB search failed")?;
            print_json(&hits)?;
        }
        Command::Ticket { payload } => {
            let payload: TicketPayload =
                serde_json::from_str(&payload).context("Ticket payload is not valid JSON")?;
            let ticket = orchestrator
                .ledger()
                .log(&payload)
                .context("Failed to log ticket")?;
            print_json(&ticket)?;
        }
    }

    Ok(())
}
