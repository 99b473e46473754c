#![cfg(not(tarpaulin_include))]

use clap::{ArgAction, Parser, Subcommand};
use log::{LevelFilter, error, warn};
use progress::auth::AuthSessionManager;
use progress::config::{Config, Environment};
use progress::error::PipelineError;
use progress::extract::ExerciseExtractor;
use progress::identity::OAuthClient;
use progress::picker::{DrivePicker, PromptChooser};
use progress::pipeline::{Command, Outcome, PipelineController};
use progress::sheets::{GoogleSheetsClient, GridFetcher};
use progress::store::FileSessionStore;
use progress::{AuthStatus, WorkoutProgram};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

type Controller =
    PipelineController<FileSessionStore, OAuthClient, DrivePicker<PromptChooser>, GoogleSheetsClient>;

#[derive(Parser, Debug)]
#[command(version, about = "Read a workout program from a Google spreadsheet", long_about = None)]
struct Args {
    /// Configuration file (defaults to $PROGRESS_CONFIG, then ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment whose defaults are used (defaults to $PROGRESS_ENV)
    #[arg(long, value_enum, global = true)]
    env: Option<Environment>,

    /// More logging; repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in with Google and remember the session
    Login,
    /// Forget the session and revoke its token
    Logout,
    /// Show whether a session is remembered
    Status,
    /// Pick a spreadsheet and print its exercises
    Run {
        /// Spreadsheet id; skips the picker
        #[arg(long)]
        document: Option<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    // RUST_LOG wins over -v.
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr);
    let _ = builder.try_init();
}

fn build_controller(config: &Config) -> Result<Controller, PipelineError> {
    config.require_client_id()?;

    let store = match &config.session_path {
        Some(path) => FileSessionStore::new(path),
        None => FileSessionStore::default_location().ok_or_else(|| {
            PipelineError::Config("no configuration directory for the session file".into())
        })?,
    };
    let auth = AuthSessionManager::new(store, OAuthClient::new(config.identity.clone())?)
        .with_restore_policy(config.restore_policy);

    Ok(PipelineController::new(
        auth,
        DrivePicker::new(&config.api, PromptChooser)?,
        GridFetcher::new(GoogleSheetsClient::new(&config.api)?),
        ExerciseExtractor::new(config.coercion),
    ))
}

fn print_program(program: &WorkoutProgram) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", program.document_title);
    for exercise in &program.exercises {
        let _ = writeln!(out, "\n== {}", exercise.name);
        if exercise.movements.is_empty() {
            let _ = writeln!(out, "  (no movements)");
        }
        for m in &exercise.movements {
            let load = if m.load.is_empty() { "-" } else { m.load.as_str() };
            let _ = writeln!(
                out,
                "  {:<24} {}x{} @ {}, rest {}s, progression {}",
                m.name, m.sets, m.reps, load, m.rest, m.progression_rate
            );
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(args.config.as_deref(), args.env)?;
    let controller = build_controller(&config)?;
    run_command(&controller, args.command).await
}

async fn run_command(
    controller: &Controller,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    // An unreadable session must not block logout, which deletes it unread.
    let restored = controller.auth().restore().await;
    if let Err(e) = &restored {
        warn!("could not restore the saved session: {}", e);
    }

    match command {
        Commands::Status => match (restored, controller.auth().status()) {
            (Err(e), _) => println!("Signed out (saved session unusable: {})", e),
            (Ok(_), AuthStatus::SignedIn) => println!("Signed in"),
            (Ok(_), AuthStatus::SignedOut) => println!("Signed out"),
            (Ok(_), other) => println!("{:?}", other),
        },
        Commands::Login => {
            if let Some(Outcome::Failure { message, .. }) = controller.handle(Command::SignIn).await {
                return Err(message.into());
            }
            println!("Signed in");
        }
        Commands::Logout => {
            controller.handle(Command::SignOut).await;
            println!("Signed out");
        }
        Commands::Run { document, json } => {
            let command = match document {
                Some(document_id) => Command::Load { document_id },
                None => Command::Pick,
            };
            let Some(outcome) = controller.handle(command).await else {
                return Err("run was superseded".into());
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            match outcome {
                Outcome::Success(program) => {
                    if !json {
                        print_program(&program);
                    }
                }
                Outcome::Cancelled => eprintln!("No spreadsheet chosen"),
                Outcome::Failure { message, .. } => return Err(message.into()),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("We weren't able to connect to your exercises: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_at(path: PathBuf) -> Controller {
        let mut config = Config::defaults(Environment::Development);
        config.identity.client_id = "client-123".into();
        config.session_path = Some(path);
        build_controller(&config).unwrap()
    }

    #[tokio::test]
    async fn test_logout_clears_unreadable_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let controller = controller_at(path.clone());
        run_command(&controller, Commands::Logout).await.unwrap();

        assert!(!path.exists());
        assert_eq!(controller.auth().status(), AuthStatus::SignedOut);
    }

    #[tokio::test]
    async fn test_status_reports_unreadable_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let controller = controller_at(path.clone());
        assert!(run_command(&controller, Commands::Status).await.is_ok());
        assert!(path.exists());
    }
}
