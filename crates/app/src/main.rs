use std::fmt;
use std::sync::Arc;

use mastery_core::model::{CourseId, MasterySettings, QuestionId, StudentId};
use mastery_core::scheduler::MasteryScheduler;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use services::{Clock, QuestionPicker, SessionDriver, SessionService};
use storage::repository::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidStudentId { raw: String },
    InvalidCourseId { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNumber { flag: &'static str, raw: String },
    InvalidAccuracy { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidStudentId { raw } => write!(f, "invalid --student-id value: {raw}"),
            ArgsError::InvalidCourseId { raw } => write!(f, "invalid --course-id value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidAccuracy { raw } => {
                write!(f, "invalid --accuracy value (expected 0..=1): {raw}")
            }
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

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- drill  [options]   # simulate a student until mastery");
    eprintln!("  cargo run -p app -- status [options]   # show current progress");
    eprintln!("  cargo run -p app -- seed   [options]   # initialize progress records only");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>    (default sqlite:mastery.sqlite3)");
    eprintln!("  --student-id <id>    (default 1)");
    eprintln!("  --course-id <id>     (default 1)");
    eprintln!("  --questions <n>      size of the demo catalog (default 20)");
    eprintln!("  --capacity <n>       active set capacity (default 5)");
    eprintln!("  --threshold <n>      mastery streak threshold (default 3)");
    eprintln!("  --accuracy <0..=1>   simulated answer accuracy for drill (default 0.85)");
    eprintln!("  --seed <n>           RNG seed for reproducible drills");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  MASTERY_DB_URL, MASTERY_STUDENT_ID, MASTERY_COURSE_ID, MASTERY_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Drill,
    Status,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "drill" => Some(Self::Drill),
            "status" => Some(Self::Status),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    student_id: StudentId,
    course_id: CourseId,
    questions: u32,
    capacity: u32,
    threshold: u32,
    accuracy: f64,
    seed: Option<u64>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("MASTERY_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://mastery.sqlite3".into(), normalize_sqlite_url);
        let mut student_id = std::env::var("MASTERY_STUDENT_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| StudentId::new(1), StudentId::new);
        let mut course_id = std::env::var("MASTERY_COURSE_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| CourseId::new(1), CourseId::new);
        let mut questions: u32 = 20;
        let mut capacity: u32 = 5;
        let mut threshold: u32 = 3;
        let mut accuracy: f64 = 0.85;
        let mut seed: Option<u64> = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--student-id" => {
                    let value = require_value(args, "--student-id")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidStudentId { raw: value.clone() })?;
                    student_id = StudentId::new(parsed);
                }
                "--course-id" => {
                    let value = require_value(args, "--course-id")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidCourseId { raw: value.clone() })?;
                    course_id = CourseId::new(parsed);
                }
                "--questions" => {
                    questions = parse_number(args, "--questions")?;
                }
                "--capacity" => {
                    capacity = parse_number(args, "--capacity")?;
                }
                "--threshold" => {
                    threshold = parse_number(args, "--threshold")?;
                }
                "--accuracy" => {
                    let value = require_value(args, "--accuracy")?;
                    let parsed: f64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidAccuracy { raw: value.clone() })?;
                    if !(0.0..=1.0).contains(&parsed) {
                        return Err(ArgsError::InvalidAccuracy { raw: value });
                    }
                    accuracy = parsed;
                }
                "--seed" => {
                    let value = require_value(args, "--seed")?;
                    let parsed: u64 = value.parse().map_err(|_| ArgsError::InvalidNumber {
                        flag: "--seed",
                        raw: value.clone(),
                    })?;
                    seed = Some(parsed);
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
            student_id,
            course_id,
            questions,
            capacity,
            threshold,
            accuracy,
            seed,
        })
    }
}

fn parse_number(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<u32, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("MASTERY_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// The demo catalog: question ids 1..=n. Real deployments get the ordered id
/// list from the course catalog service instead.
fn demo_catalog(questions: u32) -> Vec<QuestionId> {
    (1..=u64::from(questions)).map(QuestionId::new).collect()
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    argv.remove(0);

    let mut iter = argv.into_iter();
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so
    // core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;

    let settings = MasterySettings::new(parsed.capacity, parsed.threshold)?;
    let service = SessionService::new(
        Clock::default_clock(),
        MasteryScheduler::with_settings(settings),
        Arc::clone(&storage.progress),
    );
    let catalog = demo_catalog(parsed.questions);

    match cmd {
        Command::Drill => {
            let picker = parsed
                .seed
                .map_or_else(QuestionPicker::new, QuestionPicker::seeded);
            let mut answer_rng = parsed
                .seed
                .map_or_else(StdRng::from_os_rng, |s| StdRng::seed_from_u64(s.wrapping_add(1)));

            let mut driver = SessionDriver::new(&service, picker);
            let summary = driver
                .run(parsed.student_id, parsed.course_id, &catalog, |question| {
                    let correct = answer_rng.random_bool(parsed.accuracy);
                    tracing::debug!(%question, correct, "simulated answer");
                    correct
                })
                .await?;

            println!(
                "drill finished: {} answers submitted, {}/{} mastered",
                summary.answers_submitted,
                summary.snapshot.mastered_count,
                summary.snapshot.total_questions
            );
            Ok(())
        }
        Command::Status => {
            let snapshot = service
                .snapshot(parsed.student_id, parsed.course_id, &catalog)
                .await?;
            println!(
                "student {} / course {}: {}/{} mastered{}",
                parsed.student_id,
                parsed.course_id,
                snapshot.mastered_count,
                snapshot.total_questions,
                if snapshot.is_complete { " (complete)" } else { "" }
            );

            let active: Vec<String> = snapshot
                .active_set
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("active set: [{}]", active.join(", "));

            for record in service
                .progress_records(parsed.student_id, parsed.course_id)
                .await?
            {
                println!(
                    "  q{:<6} streak={:<3} active={:<5} mastered={}",
                    record.question_id, record.streak, record.is_active, record.is_mastered
                );
            }
            Ok(())
        }
        Command::Seed => {
            let snapshot = service
                .initialize(parsed.student_id, parsed.course_id, &catalog)
                .await?;
            println!(
                "seeded {} questions for student {} / course {} ({} active)",
                snapshot.total_questions,
                parsed.student_id,
                parsed.course_id,
                snapshot.active_set.len()
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
