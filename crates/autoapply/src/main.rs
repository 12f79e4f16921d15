mod report;

use anyhow::{Context, Result, bail};
use autoapply_engine::backend::Backend;
use autoapply_engine::config::{AutoApplyConfig, ConfigLoader, StoreConfig, StoreKind};
use autoapply_engine::llm::OpenAiEvaluator;
use autoapply_engine::model::{ApplicantProfile, SearchParams, SessionConfig};
use autoapply_engine::store::{JsonlStore, MemoryStore, SessionStore};
use autoapply_engine::{SESSION_LIST_LIMIT, SessionManager};
use autoapply_h::HeadlessBackend;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autoapply", version, about = "Autonomous job application runner")]
struct Args {
    /// Config file (defaults to ./autoapply.yaml, then ~/.autoapply/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search, score and apply until the cap or the results run out
    Run {
        /// Applicant profile (YAML)
        #[arg(long)]
        profile: PathBuf,
        /// Search keywords
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "")]
        location: String,
        /// Site job-type filter, e.g. "fulltime"
        #[arg(long)]
        job_type: Option<String>,
        /// Maximum number of submitted applications
        #[arg(long, default_value_t = 10)]
        max: u32,
        /// Minimum match score (0-100)
        #[arg(long, default_value_t = 60)]
        min_score: u8,
        /// Resume file attached when a form asks for one
        #[arg(long)]
        resume: Option<PathBuf>,
        #[arg(long, default_value = "local")]
        user: String,
        /// Show the browser window (needed for a first manual sign-in)
        #[arg(long)]
        visible: Option<bool>,
        /// Seconds between progress lines
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
    /// Print a finished session from the durable store
    Show {
        session_id: String,
    },
    /// List a user's recent sessions, newest first
    List {
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Delete a session and its logs from the durable store
    Delete {
        session_id: String,
        #[arg(long, default_value = "local")]
        user: String,
        /// Also delete a record still marked running, e.g. after a crash
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the report; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = load_config(args.config.as_deref()).await?;

    match args.command {
        Command::Run {
            profile,
            query,
            location,
            job_type,
            max,
            min_score,
            resume,
            user,
            visible,
            interval,
        } => {
            if let Some(visible) = visible {
                config.browser.visible = visible;
            }
            let profile = load_profile(&profile).await?;
            let session = SessionConfig {
                user_id: user,
                search: SearchParams {
                    query,
                    location,
                    job_type,
                },
                max_applications: max,
                min_match_score: min_score,
                profile,
                resume_path: resume,
            };
            run(config, session, Duration::from_secs(interval.max(1))).await
        }
        Command::Show { session_id } => show(&config.store, &session_id).await,
        Command::List { user } => list(&config.store, &user).await,
        Command::Delete {
            session_id,
            user,
            force,
        } => delete(&config.store, &user, &session_id, force).await,
    }
}

async fn load_config(path: Option<&Path>) -> Result<AutoApplyConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    Ok(config)
}

async fn load_profile(path: &Path) -> Result<ApplicantProfile> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading profile {}", path.display()))?;
    let profile: ApplicantProfile = serde_yaml::from_str(&content)
        .with_context(|| format!("parsing profile {}", path.display()))?;
    if profile.email.trim().is_empty() {
        bail!("profile {} has no email", path.display());
    }
    Ok(profile)
}

fn build_store(config: &StoreConfig) -> Arc<dyn SessionStore> {
    match (&config.kind, &config.path) {
        (StoreKind::Jsonl, Some(path)) => Arc::new(JsonlStore::new(path.clone())),
        (StoreKind::Jsonl, None) => {
            tracing::warn!("No store path and no home directory; keeping records in memory");
            Arc::new(MemoryStore::new())
        }
        (StoreKind::Memory, _) => Arc::new(MemoryStore::new()),
    }
}

async fn run(config: AutoApplyConfig, session: SessionConfig, interval: Duration) -> Result<()> {
    let evaluator = OpenAiEvaluator::from_env(&config.llm).context("creating the LLM client")?;
    let store = build_store(&config.store);
    let browser = config.browser.clone();
    let factory = Arc::new(move || -> Box<dyn Backend> {
        Box::new(HeadlessBackend::new(browser.clone()))
    });

    let manager = SessionManager::new(config, factory, Arc::new(evaluator), store)?;
    let id = manager.start(session)?;
    println!("Session {} started", id);

    let mut printer = report::ProgressPrinter::default();
    let mut ticker = tokio::time::interval(interval);
    let mut cancelled = false;
    while manager.is_active(&id) {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(snapshot) = manager.progress(&id) {
                    printer.print(&snapshot);
                }
            }
            signal = tokio::signal::ctrl_c(), if !cancelled => {
                signal?;
                println!("Cancelling after the current job...");
                manager.cancel(&id);
                cancelled = true;
            }
        }
    }

    let session = manager.wait(&id).await?;
    printer.print(&session);
    report::summary(&session);
    Ok(())
}

async fn show(config: &StoreConfig, session_id: &str) -> Result<()> {
    let store = build_store(config);
    match store.load_session(session_id).await? {
        Some(session) => {
            report::summary(&session);
            report::print_logs(&session.logs);
            Ok(())
        }
        None => bail!("no session {}", session_id),
    }
}

async fn list(config: &StoreConfig, user: &str) -> Result<()> {
    let store = build_store(config);
    let sessions = store.list_sessions(user, SESSION_LIST_LIMIT).await?;
    if sessions.is_empty() {
        println!("No sessions for {}", user);
    }
    for session in &sessions {
        report::list_line(session);
    }
    Ok(())
}

async fn delete(config: &StoreConfig, user: &str, session_id: &str, force: bool) -> Result<()> {
    let store = build_store(config);
    let session = store
        .load_session(session_id)
        .await?
        .filter(|s| s.user_id == user)
        .with_context(|| format!("no session {} for {}", session_id, user))?;
    if !session.status.is_terminal() && !force {
        bail!(
            "session {} is {}; cancel it first or pass --force",
            session_id,
            session.status
        );
    }
    store.delete_session(session_id).await?;
    println!("Deleted session {}", session_id);
    Ok(())
}
