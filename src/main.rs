use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use assay::config::AppConfig;
use assay::domain::jira::{IssueTracker, JiraClient};
use assay::domain::llm::OpenAiClient;
use assay::domain::vcs::GitHubProvider;
use assay::review::{CreateSessionRequest, ReviewEngine};
use assay::session::{lock_session, InMemorySessionStore};
use assay::types::ReviewStatus;

#[derive(Parser)]
#[command(name = "assay")]
#[command(about = "Assay - AI-assisted pull request review")]
struct Cli {
    /// PR URL, e.g. https://github.com/owner/repo/pull/123
    pr_url: String,

    /// Issue-tracker key to attach (e.g. PROJ-123); auto-detected from the
    /// PR title/branch when omitted
    #[arg(long)]
    issue: Option<String>,

    /// Extra review instructions passed to the model
    #[arg(short, long, default_value = "")]
    prompt: String,

    /// Model to use
    #[arg(short, long, default_value = "gpt-5.2")]
    model: String,

    /// Human language for the review output
    #[arg(short, long, default_value = "English")]
    language: String,

    /// Skip the PR-level meta review
    #[arg(long)]
    skip_meta: bool,

    /// Session time-to-live in minutes
    #[arg(long)]
    ttl_minutes: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("assay=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Configuration error")?;

    let vcs = Arc::new(GitHubProvider::new(&config.github)?);
    let llm = Arc::new(OpenAiClient::new(&config.llm)?);
    let issues: Option<Arc<dyn IssueTracker>> = match &config.jira {
        Some(jira_config) => Some(Arc::new(JiraClient::new(jira_config)?)),
        None => None,
    };
    let store = Arc::new(InMemorySessionStore::new());

    let engine = ReviewEngine::new(vcs, llm, issues, store, config);

    let session = engine
        .create_session(CreateSessionRequest {
            pr_url: cli.pr_url.clone(),
            issue_key: cli.issue.clone(),
            prompt: cli.prompt.clone(),
            model: cli.model.clone(),
            language: cli.language.clone(),
            ttl_minutes: cli.ttl_minutes,
        })
        .await
        .context("Failed to create review session")?;

    let (session_id, pr_title, file_paths) = {
        let s = lock_session(&session);
        (
            s.id.clone(),
            s.pr.title.clone(),
            s.files.iter().map(|f| f.path.clone()).collect::<Vec<_>>(),
        )
    };
    info!(session_id = %session_id, files = file_paths.len(), "session created");

    println!("# Review: {pr_title}\n");

    for path in &file_paths {
        println!("## {path}\n");
        match engine.run_file_review(&session, path).await {
            Ok(result) => {
                if result.status == ReviewStatus::DoneWithWarnings {
                    warn!(path = %path, warnings = ?result.warnings, "review completed with warnings");
                }
                let s = result.severity_summary;
                println!(
                    "_{:?} - blocker: {}, major: {}, minor: {}, nit: {}_\n",
                    result.status, s.blocker, s.major, s.minor, s.nit
                );
                println!("{}\n", result.output_markdown);
            }
            Err(e) => {
                warn!(path = %path, error = %e, "file review failed");
                println!("_failed: {e}_\n");
            }
        }
    }

    if !cli.skip_meta {
        let has_completed = {
            let s = lock_session(&session);
            s.reviews.values().any(|r| r.status.is_complete())
        };
        if has_completed {
            println!("# Meta review\n");
            let meta = engine
                .run_meta_review(&session)
                .await
                .context("Meta review failed")?;
            info!(
                files = meta.files_considered,
                findings = meta.total_findings,
                "meta review done"
            );
            println!("{}\n", meta.output_markdown);
        } else {
            warn!("no completed file reviews, skipping meta review");
        }
    }

    engine.store.delete(&session_id);
    Ok(())
}
