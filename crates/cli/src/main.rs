use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use gradekeep_config::AppConfig;
use gradekeep_engine::{Engine, EngineLimits, InMemoryUserDirectory, UserDirectory};
use gradekeep_graders::GraderRegistry;
use gradekeep_reporters::{MoodleReporter, ReporterRegistry};
use gradekeep_sandbox::Limits;
use gradekeep_store::Store;

#[derive(Debug, Parser)]
#[command(name = "gradekeep", version, about = "Sandboxed grading service for programming assignments")]
struct Cli {
    /// Path to the layered TOML configuration file.
    #[arg(long, default_value = "config/default.toml")]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Assignment {
        #[command(subcommand)]
        command: AssignmentCommands,
    },
    Test {
        #[command(subcommand)]
        command: TestCommands,
    },
    Submission {
        #[command(subcommand)]
        command: SubmissionCommands,
    },
    File {
        #[command(subcommand)]
        command: FileCommands,
    },
    Reporter {
        #[command(subcommand)]
        command: ReporterCommands,
    },
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
}

#[derive(Debug, Subcommand)]
enum AssignmentCommands {
    Create { name: String, owner: String },
    List,
}

#[derive(Debug, Subcommand)]
enum TestCommands {
    Create {
        assignment: String,
        name: String,
        owner: String,
        /// One of `script`, `io`, `null`.
        #[arg(long)]
        tester: String,
        #[arg(long, default_value_t = 100.0)]
        maxscore: f64,
        /// Path to the grader script inside the repo, when not file-provided.
        #[arg(long, default_value = "")]
        path_script: String,
    },
    List,
}

#[derive(Debug, Subcommand)]
enum SubmissionCommands {
    Create { assignment: String, owner: String },
    List,
}

#[derive(Debug, Subcommand)]
enum FileCommands {
    Add {
        owner: String,
        key: String,
        path: String,
    },
    /// Expands a zip archive into one File per entry (C9).
    AddArchive { owner: String, path: String },
    List,
}

#[derive(Debug, Subcommand)]
enum ReporterCommands {
    CreateNull { owner: String },
    CreateMoodle {
        owner: String,
        #[arg(long)]
        asn_id: String,
        #[arg(long, default_value_t = true)]
        respect_duedate: bool,
        #[arg(long, default_value_t = true)]
        only_higher: bool,
        #[arg(long, default_value = "0")]
        prereq_id: String,
        #[arg(long, default_value = "0")]
        prereq_min: String,
    },
    List,
}

#[derive(Debug, Subcommand)]
enum RunCommands {
    Submit {
        test: String,
        submission: String,
        owner: String,
        /// Block until the run reaches a terminal status before exiting.
        #[arg(long)]
        wait: bool,
    },
    Get { uuid: String },
    List,
    Delete { uuid: String },
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("{raw:?} is not a valid uuid"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    let store = Arc::new(Store::open(&config.store.db, &config.files.root)?);

    match cli.command {
        Commands::Assignment { command } => run_assignment(&store, command)?,
        Commands::Test { command } => run_test(&store, command)?,
        Commands::Submission { command } => run_submission(&store, command)?,
        Commands::File { command } => run_file(&store, command)?,
        Commands::Reporter { command } => run_reporter(&store, command)?,
        Commands::Run { command } => run_run(store, &config, command).await?,
    }

    Ok(())
}

fn run_assignment(store: &Store, command: AssignmentCommands) -> Result<()> {
    match command {
        AssignmentCommands::Create { name, owner } => {
            let owner = parse_uuid(&owner)?;
            let uuid = store.create_assignment(owner, &name)?;
            println!("{uuid}");
        }
        AssignmentCommands::List => {
            for uuid in store.list_assignments()? {
                let record = store.get_assignment(&uuid)?;
                println!("{uuid}  {}", record.name);
            }
        }
    }
    Ok(())
}

fn run_test(store: &Store, command: TestCommands) -> Result<()> {
    match command {
        TestCommands::Create {
            assignment,
            name,
            owner,
            tester,
            maxscore,
            path_script,
        } => {
            let mut fields = HashMap::new();
            fields.insert("name".to_string(), name);
            fields.insert("tester".to_string(), tester);
            fields.insert("maxscore".to_string(), maxscore.to_string());
            fields.insert("path_script".to_string(), path_script);
            fields.insert("owner".to_string(), parse_uuid(&owner)?.to_string());
            fields.insert("assignment".to_string(), parse_uuid(&assignment)?.to_string());
            let uuid = store.create_test(fields)?;
            println!("{uuid}");
        }
        TestCommands::List => {
            for uuid in store.list_tests()? {
                let record = store.get_test(&uuid)?;
                println!("{uuid}  {} ({})", record.name, record.tester.as_str());
            }
        }
    }
    Ok(())
}

fn run_submission(store: &Store, command: SubmissionCommands) -> Result<()> {
    match command {
        SubmissionCommands::Create { assignment, owner } => {
            let mut fields = HashMap::new();
            fields.insert("owner".to_string(), parse_uuid(&owner)?.to_string());
            fields.insert("assignment".to_string(), parse_uuid(&assignment)?.to_string());
            let uuid = store.create_submission(fields)?;
            println!("{uuid}");
        }
        SubmissionCommands::List => {
            for uuid in store.list_submissions()? {
                println!("{uuid}");
            }
        }
    }
    Ok(())
}

fn run_file(store: &Store, command: FileCommands) -> Result<()> {
    match command {
        FileCommands::Add { owner, key, path } => {
            let owner = parse_uuid(&owner)?;
            let data = std::fs::read(&path).with_context(|| format!("reading {path}"))?;
            let filename = std::path::Path::new(&path)
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or(&path);
            let uuid = store.create_file(owner, &key, &data, filename)?;
            println!("{uuid}");
        }
        FileCommands::AddArchive { owner, path } => {
            let owner = parse_uuid(&owner)?;
            let data = std::fs::read(&path).with_context(|| format!("reading {path}"))?;
            let uuids = store.ingest_archive(owner, &data)?;
            for uuid in uuids {
                println!("{uuid}");
            }
        }
        FileCommands::List => {
            for uuid in store.list_files()? {
                let record = store.get_file(&uuid)?;
                println!("{uuid}  {} ({})", record.name, record.key);
            }
        }
    }
    Ok(())
}

fn run_reporter(store: &Store, command: ReporterCommands) -> Result<()> {
    match command {
        ReporterCommands::CreateNull { owner } => {
            let owner = parse_uuid(&owner)?;
            let mut fields = HashMap::new();
            fields.insert("mod".to_string(), "null".to_string());
            let uuid = store.create_reporter(owner, fields)?;
            println!("{uuid}");
        }
        ReporterCommands::CreateMoodle {
            owner,
            asn_id,
            respect_duedate,
            only_higher,
            prereq_id,
            prereq_min,
        } => {
            let owner = parse_uuid(&owner)?;
            let mut fields = HashMap::new();
            fields.insert("mod".to_string(), "moodle".to_string());
            fields.insert("moodle_asn_id".to_string(), asn_id);
            fields.insert(
                "moodle_respect_duedate".to_string(),
                (respect_duedate as u8).to_string(),
            );
            fields.insert("moodle_only_higher".to_string(), (only_higher as u8).to_string());
            fields.insert("moodle_prereq_id".to_string(), prereq_id);
            fields.insert("moodle_prereq_min".to_string(), prereq_min);
            let uuid = store.create_reporter(owner, fields)?;
            println!("{uuid}");
        }
        ReporterCommands::List => {
            for uuid in store.list_reporters()? {
                let record = store.get_reporter(&uuid)?;
                println!("{uuid}  {}", record.kind.as_str());
            }
        }
    }
    Ok(())
}

async fn run_run(store: Arc<Store>, config: &AppConfig, command: RunCommands) -> Result<()> {
    match command {
        RunCommands::Submit {
            test,
            submission,
            owner,
            wait,
        } => {
            let test = parse_uuid(&test)?;
            let submission = parse_uuid(&submission)?;
            let owner = parse_uuid(&owner)?;

            let engine = build_engine(store.clone(), config);
            let run = engine.create_run(test, submission, owner)?;
            println!("{run}");

            if wait {
                loop {
                    if engine.is_complete(&run)? {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                let record = engine.get_run(&run)?;
                println!("status: {}", record.status.as_str());
                println!("score: {}", record.score);
                println!("output:\n{}", record.output);
            }

            engine.shutdown(Duration::from_secs(5)).await;
        }
        RunCommands::Get { uuid } => {
            let uuid = parse_uuid(&uuid)?;
            let record = store.get_run(&uuid)?;
            println!("status: {}", record.status.as_str());
            println!("retcode: {}", record.retcode);
            println!("score: {}", record.score);
            println!("output:\n{}", record.output);
        }
        RunCommands::List => {
            for uuid in store.list_runs()? {
                let record = store.get_run(&uuid)?;
                println!("{uuid}  {}  score={}", record.status.as_str(), record.score);
            }
        }
        RunCommands::Delete { uuid } => {
            let uuid = parse_uuid(&uuid)?;
            store.delete_run(&uuid)?;
        }
    }
    Ok(())
}

/// Builds an [`Engine`] for a single command invocation. The demonstration
/// binary is one-shot rather than a long-lived server, so every `run submit`
/// call spins its own worker pool up and tears it down again; a persistent
/// deployment would instead construct one `Engine` at process start and keep
/// it alive behind a request-handling loop.
fn build_engine(store: Arc<Store>, config: &AppConfig) -> Engine {
    let graders = Arc::new(GraderRegistry::with_builtins());
    let reporters = Arc::new(ReporterRegistry::with_builtins(MoodleReporter::new(
        config.reporter_moodle.clone(),
    )));
    let users: Arc<dyn UserDirectory> = Arc::new(InMemoryUserDirectory::new());

    let limits = EngineLimits {
        sandbox: Limits {
            wall_timeout: Duration::from_secs(config.sandbox_limits.wall),
            cpu_seconds: config.sandbox_limits.cpu,
            mem_bytes: config.sandbox_limits.mem,
            max_procs: config.sandbox_limits.procs,
            max_fds: config.sandbox_limits.fds,
        },
        capture_bytes: 65536,
        worker_count: config.worker.count,
        queue_depth: config.worker.queue_depth,
    };

    Engine::new(store, graders, reporters, users, limits)
}
