use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use motabea_attendance::config::EngineConfig;
use motabea_attendance::db::{self, PgStore};
use motabea_attendance::escalation::{Escalator, RecordOutcome};
use motabea_attendance::messages::{self, FormKind};
use motabea_attendance::models::EventKind;
use motabea_attendance::token::TokenIssuer;

#[derive(Parser)]
#[command(name = "motabea-attendance")]
#[command(about = "Absence and lateness escalation for MOTABEA schools", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,
    /// JSON file with start time and threshold tables
    #[arg(long, env = "MOTABEA_CONFIG", global = true)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Absence,
    Late,
}

impl From<KindArg> for EventKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Absence => EventKind::Absence,
            KindArg::Late => EventKind::Late,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormArg {
    GuidanceReferral,
    ParentSummon,
    EducationOfficeNotice,
}

impl From<FormArg> for FormKind {
    fn from(value: FormArg) -> Self {
        match value {
            FormArg::GuidanceReferral => FormKind::GuidanceReferral,
            FormArg::ParentSummon => FormKind::ParentSummon,
            FormArg::EducationOfficeNotice => FormKind::EducationOfficeNotice,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample students and events
    Seed,
    /// Import attendance events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record an absence and report any escalation
    RecordAbsence {
        #[arg(long)]
        student: String,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        period: Option<String>,
    },
    /// Record a late arrival (HH:MM) and report any escalation
    RecordLate {
        #[arg(long)]
        student: String,
        #[arg(long)]
        arrival: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show running totals for one student
    Stats {
        #[arg(long)]
        student: String,
        #[arg(long, value_enum, default_value = "absence")]
        kind: KindArg,
    },
    /// Write the markdown daily report
    DailyReport {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "daily-report.md")]
        out: PathBuf,
    },
    /// Per-student totals for a week or month
    RangeReport {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Write a printable absence form as HTML
    Form {
        #[arg(long)]
        student: String,
        #[arg(long, value_enum)]
        kind: FormArg,
        #[arg(long, default_value = "form.html")]
        out: PathBuf,
    },
    /// Issue a quick-access link token
    Token {
        /// Lifetime in minutes; defaults to the configured value
        #[arg(long)]
        minutes: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("motabea_attendance={},warn", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let today = Utc::now().date_naive();

    match cli.command {
        Commands::Token { minutes } => {
            let minutes = minutes.unwrap_or(config.token_lifetime_minutes);
            let issuer = TokenIssuer::from_minutes(minutes).context("invalid token lifetime")?;
            let token = issuer.issue();
            println!("{}", serde_json::to_string_pretty(&token)?);
        }
        Commands::InitDb => {
            let store = connect(cli.database_url).await?;
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let store = connect(cli.database_url).await?;
            db::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let store = connect(cli.database_url).await?;
            let inserted = db::import_csv(&store, &csv, &config.expected_time).await?;
            println!("Inserted {inserted} events from {}.", csv.display());
        }
        Commands::RecordAbsence {
            student,
            date,
            period,
        } => {
            let engine = Escalator::new(connect(cli.database_url).await?, config);
            let student = engine.roster_student(&student).await?;
            let outcome = engine
                .record_absence(&student, date.unwrap_or(today), period)
                .await?;
            print_outcome(&outcome, student.guardian_phone.as_deref());
        }
        Commands::RecordLate {
            student,
            arrival,
            date,
        } => {
            let engine = Escalator::new(connect(cli.database_url).await?, config);
            let student = engine.roster_student(&student).await?;
            let outcome = engine
                .record_late(&student, date.unwrap_or(today), &arrival)
                .await?;
            print_outcome(&outcome, student.guardian_phone.as_deref());
        }
        Commands::Stats { student, kind } => {
            let engine = Escalator::new(connect(cli.database_url).await?, config);
            let stats = engine.student_stats(&student, kind.into()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::DailyReport { date, out } => {
            let engine = Escalator::new(connect(cli.database_url).await?, config);
            let report = engine.daily_report(date.unwrap_or(today)).await?;
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::RangeReport { from, to, limit } => {
            let engine = Escalator::new(connect(cli.database_url).await?, config);
            let summary = engine.range_summary(from, to).await?;
            println!(
                "{} to {}: {} absences, {} late arrivals",
                summary.from, summary.to, summary.absence_count, summary.late_count
            );
            for row in summary.students.iter().take(limit) {
                println!(
                    "- {} ({}, {}) absences {} late {} ({} min)",
                    row.student_name,
                    row.student_id,
                    row.class_room,
                    row.absences,
                    row.late_days,
                    row.late_minutes
                );
            }
        }
        Commands::Form { student, kind, out } => {
            let engine = Escalator::new(connect(cli.database_url).await?, config);
            let student = engine.roster_student(&student).await?;
            let dates = engine.absence_dates(&student.id).await?;
            let document =
                messages::printable_form_content(kind.into(), &student, &dates, dates.len() as u32);
            std::fs::write(&out, document.to_html())?;
            info!(student_id = %student.id, out = %out.display(), "form written");
            println!("Form written to {}.", out.display());
        }
    }

    Ok(())
}

async fn connect(database_url: Option<String>) -> anyhow::Result<PgStore> {
    let database_url =
        database_url.context("DATABASE_URL must be set to a Postgres instance")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(PgStore::new(pool))
}

fn print_outcome(outcome: &RecordOutcome, guardian_phone: Option<&str>) {
    println!(
        "Recorded {} for {} on {} (event {}).",
        outcome.event.kind.as_str(),
        outcome.event.student_name,
        outcome.event.date,
        outcome.event.id
    );
    println!(
        "Total {}, consecutive days {}, average minutes {}.",
        outcome.stats.total_count, outcome.stats.consecutive_days, outcome.stats.average_minutes
    );

    if let Some(message) = &outcome.guardian_message {
        println!();
        println!("{message}");
        match guardian_phone {
            Some(phone) => println!("{}", messages::whatsapp_link(phone, message)),
            None => warn!(student_id = %outcome.event.student_id, "no guardian phone on file"),
        }
    }

    let escalation = (&outcome.decision.threshold, &outcome.escalation_message);
    if let (Some(threshold), Some(message)) = escalation {
        println!();
        println!("Escalation: {} ({}).", threshold.label, threshold.count);
        println!("{message}");
    }
}
