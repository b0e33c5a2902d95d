use clap::{Parser, Subcommand};
use dotenvy::from_path as dotenv_from_path;
use serde_json::json;
use std::path::{Path, PathBuf};
use thiserror::Error;

use auditroute_audit_log::{verify_log, AuditAppender};
use auditroute_context::Strategy;
use auditroute_department_index::DepartmentIndex;
use auditroute_providers::{OpenAICompatProvider, Provider};
use auditroute_pseudonymizer::Pseudonymizer;
use auditroute_router::{ProcessQueryOptions, Router};
use auditroute_store::InMemoryStore;

#[derive(Debug, Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("audit error: {0}")]
    Audit(#[from] auditroute_audit_log::AuditLogError),
    #[error("store error: {0}")]
    Store(#[from] auditroute_store::StoreError),
    #[error("pseudonymizer error: {0}")]
    Pseudonymizer(#[from] auditroute_pseudonymizer::PseudonymError),
    #[error("config error: {0}")]
    Config(String),
}

#[derive(Parser)]
#[command(name = "auditroute", version, about = "auditroute query-routing core operations")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify a hash-chained audit log JSONL and print the final hash.
    VerifyAudit {
        #[arg(long)]
        audit_log: PathBuf,
    },

    /// Drop expired pseudonym mappings (daily scheduled job, spec section 6).
    CleanupExpired {
        #[arg(long)]
        mapping_dir: PathBuf,

        #[arg(long)]
        audit_log: PathBuf,

        /// Current time as unix seconds.
        #[arg(long)]
        now: f64,
    },

    /// Run one query through the full C1-C9 pipeline against an in-memory
    /// store loaded from a JSONL file of AuditRecords.
    ProcessQuery {
        #[arg(long)]
        store_jsonl: PathBuf,

        #[arg(long)]
        audit_log: PathBuf,

        #[arg(long)]
        mapping_dir: PathBuf,

        #[arg(long)]
        session_id: String,

        #[arg(long)]
        user_id: String,

        #[arg(long)]
        thinking_mode: Option<String>,

        /// Current time as unix seconds.
        #[arg(long)]
        now: f64,

        #[arg(long)]
        query: String,
    },
}

/// `ENCRYPTION_SECRET`, `DEFAULT_PAGE_SIZE`, `CONTEXT_TOKEN_BUDGET`,
/// `INTENT_MODEL_ENDPOINT`, `GENERATIVE_MODEL_ENDPOINT`,
/// `SESSION_TTL_DAYS`, as named in spec section 6. A missing/too-short
/// `ENCRYPTION_SECRET` is a fatal startup error.
struct Config {
    encryption_secret: String,
    default_page_size: usize,
    context_token_budget: usize,
    intent_model_endpoint: Option<String>,
    generative_model_endpoint: Option<String>,
    session_ttl_days: f64,
    api_key: Option<String>,
}

impl Config {
    fn from_env() -> Result<Self, CliError> {
        let encryption_secret = std::env::var("ENCRYPTION_SECRET")
            .map_err(|_| CliError::Config("ENCRYPTION_SECRET is required".into()))?;
        if encryption_secret.len() < 32 {
            return Err(CliError::Config(format!(
                "ENCRYPTION_SECRET must be at least 32 bytes, got {}",
                encryption_secret.len()
            )));
        }
        let default_page_size = std::env::var("DEFAULT_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);
        let context_token_budget = std::env::var("CONTEXT_TOKEN_BUDGET")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);
        let session_ttl_days = std::env::var("SESSION_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30.0);
        Ok(Config {
            encryption_secret,
            default_page_size,
            context_token_budget,
            intent_model_endpoint: std::env::var("INTENT_MODEL_ENDPOINT").ok(),
            generative_model_endpoint: std::env::var("GENERATIVE_MODEL_ENDPOINT").ok(),
            session_ttl_days,
            api_key: std::env::var("OPENAI_API_KEY").ok(),
        })
    }
}

fn load_dotenv() {
    if Path::new(".env").exists() {
        let _ = dotenv_from_path(".env");
        eprintln!("loaded env from ./.env");
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    load_dotenv();
    let args = Args::parse();

    match args.cmd {
        Command::VerifyAudit { audit_log } => {
            let last = verify_log(audit_log)?;
            println!("{last}");
            Ok(())
        }

        Command::CleanupExpired { mapping_dir, audit_log, now } => {
            let config = Config::from_env()?;
            let pseudonymizer =
                Pseudonymizer::new(mapping_dir, config.encryption_secret.as_bytes(), config.session_ttl_days)?;
            let mut audit = AuditAppender::open(&audit_log)?;
            let removed = pseudonymizer.cleanup_expired(now, &mut audit)?;
            println!("{}", json!({ "removed_count": removed }));
            Ok(())
        }

        Command::ProcessQuery { store_jsonl, audit_log, mapping_dir, session_id, user_id, thinking_mode, now, query } => {
            let config = Config::from_env()?;

            let store_bytes = std::fs::read(&store_jsonl)?;
            let store = InMemoryStore::from_jsonl(&store_bytes)?;
            let dept_index = DepartmentIndex::new();
            let pseudonymizer =
                Pseudonymizer::new(mapping_dir, config.encryption_secret.as_bytes(), config.session_ttl_days)?;

            let intent_provider_instance = config
                .intent_model_endpoint
                .as_ref()
                .map(|url| OpenAICompatProvider::new(url.clone(), config.api_key.clone()));
            let intent_provider: Option<&dyn Provider> =
                intent_provider_instance.as_ref().map(|p| p as &dyn Provider);

            let generative_provider_instance = config
                .generative_model_endpoint
                .as_ref()
                .map(|url| OpenAICompatProvider::new(url.clone(), config.api_key.clone()));
            let generative_provider: Option<&dyn Provider> =
                generative_provider_instance.as_ref().map(|p| p as &dyn Provider);

            let router = Router {
                dept_index: &dept_index,
                store: &store,
                intent_provider,
                intent_model: "intent-default".to_string(),
                generative_provider,
                generative_model: "generative-default".to_string(),
                pseudonymizer: &pseudonymizer,
                context_strategy: Strategy::hybrid_default(),
                token_budget: config.context_token_budget,
                page_size: config.default_page_size,
            };

            let mut audit = AuditAppender::open(&audit_log)?;
            let options = ProcessQueryOptions { session_id, user_id, thinking_mode };

            match router.process_query(&query, &options, now, &mut audit).await {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string(&outcome)?);
                    Ok(())
                }
                Err(e) => {
                    let body = json!({
                        "success": false,
                        "error": {
                            "code": e.code.as_str(),
                            "message": e.message,
                            "suggestion": e.suggestion,
                            "fallbackData": e.fallback_data,
                        }
                    });
                    println!("{body}");
                    std::process::exit(1);
                }
            }
        }
    }
}
