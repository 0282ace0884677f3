use std::fmt;
use std::path::PathBuf;

use quiz_core::Clock;
use quiz_core::model::{Language, Level, Question, QuizKey, QuizPolicy, Topic, UserId};
use serde::Deserialize;
use storage::repository::StorageError;
use storage::sqlite::SqliteStore;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    file: PathBuf,
    users: Vec<UserId>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFile,
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidUser { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFile => write!(f, "--file is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("QUIZ_DB_URL").unwrap_or_else(|_| "sqlite:quiz.sqlite3?mode=rwc".into());
        let mut file = std::env::var("QUIZ_SEED_FILE").ok().map(PathBuf::from);
        let mut users = Vec::new();

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--file" => {
                    file = Some(PathBuf::from(require_value(&mut args, "--file")?));
                }
                "--user" => {
                    let value = require_value(&mut args, "--user")?;
                    let user = value
                        .parse::<UserId>()
                        .map_err(|_| ArgsError::InvalidUser { raw: value.clone() })?;
                    users.push(user);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            file: file.ok_or(ArgsError::MissingFile)?,
            users,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- --file <quizzes.json> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:quiz.sqlite3?mode=rwc)");
    eprintln!("  --file <path>             JSON array of quizzes to insert");
    eprintln!("  --user <id>               Register a learner account (repeatable)");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  QUIZ_DB_URL, QUIZ_SEED_FILE");
}

/// One quiz in the seed file.
#[derive(Debug, Deserialize)]
struct SeedQuiz {
    language: Language,
    level: Level,
    topic: Topic,
    questions: Vec<Question>,
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let raw = std::fs::read_to_string(&args.file)?;
    let quizzes: Vec<SeedQuiz> = serde_json::from_str(&raw)?;

    let store = SqliteStore::connect(&args.db_url)
        .await?
        .with_clock(Clock::System)
        .with_policy(QuizPolicy::default());
    store.migrate().await?;

    let mut inserted = 0_usize;
    let mut skipped = 0_usize;
    for quiz in quizzes {
        let key = QuizKey::new(quiz.language, quiz.level, quiz.topic);
        match store.insert_quiz(&key, &quiz.questions).await {
            Ok(id) => {
                tracing::info!(quiz = %key, %id, "seeded quiz");
                inserted += 1;
            }
            Err(StorageError::Conflict) => {
                tracing::warn!(quiz = %key, "quiz already present, skipping");
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    for user in &args.users {
        match store.insert_user(*user).await {
            Ok(()) | Err(StorageError::Conflict) => {}
            Err(e) => return Err(e.into()),
        }
    }

    println!(
        "Seeded {inserted} quizzes ({skipped} skipped) and {} users into {}",
        args.users.len(),
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
