use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use pathkeepers::config::{self, AppConfig};
use pathkeepers::db::{self, PgStore};
use pathkeepers::models::{AcademicUpdate, StudentQuery};
use pathkeepers::risk::{RiskModel, RiskThresholds, RiskTier, RiskWeights};
use pathkeepers::roles::{Actor, Role};
use pathkeepers::{export, import, report, service};

#[derive(Parser)]
#[command(name = "pathkeepers")]
#[command(about = "Student risk tracking for admins, mentors and counselors", long_about = None)]
struct Cli {
    #[command(flatten)]
    actor: ActorArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ActorArgs {
    /// Role to act as (admin, counselor, mentor, viewer)
    #[arg(long, global = true)]
    as_role: Option<Role>,
    /// User id to act as
    #[arg(long, global = true)]
    as_user: Option<Uuid>,
}

impl ActorArgs {
    fn actor(&self) -> anyhow::Result<Actor> {
        let role = self
            .as_role
            .context("--as-role is required for this command")?;
        let id = self
            .as_user
            .context("--as-user is required for this command")?;
        Ok(Actor::new(id, role))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo students
    Seed,
    /// Print the student import template
    Template,
    /// Compute a risk score from academic indicators
    Score {
        #[arg(long)]
        attendance: f64,
        #[arg(long)]
        cgpa: f64,
        #[arg(long)]
        completed: u32,
        #[arg(long)]
        total: u32,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Validate a student CSV and optionally insert it
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Insert valid rows instead of only reporting
        #[arg(long)]
        commit: bool,
    },
    /// Update a student's academic record and recompute risk
    Update {
        id: Uuid,
        #[arg(long)]
        attendance: Option<f64>,
        #[arg(long)]
        cgpa: Option<f64>,
        #[arg(long)]
        completed: Option<u32>,
        #[arg(long)]
        total: Option<u32>,
        /// Comma or semicolon separated subjects
        #[arg(long)]
        subjects: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Assign a mentor to a student, or clear the assignment
    Assign {
        id: Uuid,
        #[arg(long, required_unless_present = "unassign", conflicts_with = "unassign")]
        mentor: Option<Uuid>,
        #[arg(long)]
        unassign: bool,
    },
    /// Show one student's record
    Show { id: Uuid },
    /// List students visible to the acting user
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        tier: Option<RiskTier>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Show recorded risk scores for a student
    History { id: Uuid },
    /// Record the current risk score of every scored student
    CaptureSnapshots,
    /// Export visible students as CSV
    Export {
        #[arg(long)]
        search: Option<String>,
        /// Defaults to a timestamped file in the current directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown risk overview
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Inspect or change the risk model
    RiskConfig {
        #[command(subcommand)]
        action: RiskConfigAction,
    },
}

#[derive(Subcommand)]
enum RiskConfigAction {
    /// Print the active weights and thresholds
    Show,
    /// Store a new version of the weights and thresholds
    Set {
        #[arg(long)]
        attendance: f64,
        #[arg(long)]
        gpa: f64,
        #[arg(long)]
        assignments: f64,
        #[arg(long)]
        notes: f64,
        #[arg(long)]
        high: f64,
        #[arg(long)]
        medium: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config::DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match &cli.command {
        Commands::Template => {
            print!("{}", import::TEMPLATE_CSV);
            println!();
            for (name, required, notes) in import::TEMPLATE_COLUMNS {
                let requirement = if required { "required" } else { "optional" };
                if notes.is_empty() {
                    println!("# {name}: {requirement}");
                } else {
                    println!("# {name}: {requirement}, {notes}");
                }
            }
            return Ok(());
        }
        Commands::Score {
            attendance,
            cgpa,
            completed,
            total,
            note,
        } => {
            let model = RiskModel::default().with_cgpa_scale(config.cgpa_scale);
            let risk = model.assess(*attendance, *cgpa, *completed, *total, note);
            println!("Risk score {:.3} ({})", risk.score, risk.tier);
            return Ok(());
        }
        _ => {}
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")?;
    tracing::debug!(max_connections = config.max_connections, "connected to Postgres");
    let store = PgStore::new(pool.clone());

    match cli.command {
        Commands::Template | Commands::Score { .. } => {}
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let model = service::load_risk_model(&store, config.cgpa_scale).await?;
            let inserted = db::seed(&pool, &model).await?;
            println!("Seeded {inserted} students.");
        }
        Commands::Import { csv, commit } => {
            let actor = cli.actor.actor()?;
            let text = std::fs::read_to_string(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let model = service::load_risk_model(&store, config.cgpa_scale).await?;
            let report = service::run_import(&store, &model, &actor, &text, !commit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Update {
            id,
            attendance,
            cgpa,
            completed,
            total,
            subjects,
            note,
        } => {
            let actor = cli.actor.actor()?;
            let update = AcademicUpdate {
                attendance_percent: attendance,
                cgpa,
                assignments_completed: completed,
                assignments_total: total,
                subjects: subjects.map(|list| {
                    list.split(&[';', ','][..])
                        .map(str::to_string)
                        .collect()
                }),
                mentor_note: note,
            };
            let model = service::load_risk_model(&store, config.cgpa_scale).await?;
            let outcome = service::update_academics(&store, &model, &actor, id, update).await?;
            println!(
                "{} ({}) risk score {:.3} ({})",
                outcome.student.name,
                outcome.student.student_code,
                outcome.record.risk_score.unwrap_or_default(),
                outcome.record.risk_tier
            );
        }
        Commands::Assign { id, mentor, .. } => {
            let actor = cli.actor.actor()?;
            let student = service::assign_mentor(&store, &actor, id, mentor).await?;
            match student.mentor_id {
                Some(mentor_id) => println!("{} is now mentored by {mentor_id}.", student.name),
                None => println!("{} has no mentor.", student.name),
            }
        }
        Commands::Show { id } => {
            let actor = cli.actor.actor()?;
            let thresholds = active_thresholds(&store, config.cgpa_scale).await?;
            let student = service::view_student(&store, &actor, id).await?;
            let record = student.academic_record(&thresholds);
            println!("{}", serde_json::to_string_pretty(&student)?);
            println!("risk tier: {}", record.risk_tier);
        }
        Commands::List {
            search,
            tier,
            page,
            page_size,
        } => {
            let actor = cli.actor.actor()?;
            let thresholds = active_thresholds(&store, config.cgpa_scale).await?;
            let query = StudentQuery {
                page,
                page_size,
                search,
                tier,
                mentor_id: None,
            };
            let page = service::list_students(&store, &thresholds, &actor, query).await?;

            if page.data.is_empty() {
                println!("No students found.");
                return Ok(());
            }

            println!(
                "Page {} of {} ({} students):",
                page.page, page.total_pages, page.total
            );
            for student in page.data.iter() {
                let score = student
                    .risk_score
                    .map(|score| format!("{score:.2}"))
                    .unwrap_or_else(|| "n/a".to_string());
                println!(
                    "- {} {} ({}) risk {} [{}]",
                    student.student_code, student.name, student.email, score, student.risk_tier
                );
            }
        }
        Commands::History { id } => {
            let actor = cli.actor.actor()?;
            let snapshots = service::risk_history(&store, &actor, id).await?;

            if snapshots.is_empty() {
                println!("No risk history recorded.");
                return Ok(());
            }
            for snapshot in snapshots {
                println!(
                    "- {} {:.3} ({})",
                    snapshot.created_at.format("%Y-%m-%d %H:%M"),
                    snapshot.risk_score,
                    snapshot.source.as_str()
                );
            }
        }
        Commands::CaptureSnapshots => {
            let actor = cli.actor.actor()?;
            let outcome = service::capture_snapshots(&store, &actor).await?;
            println!(
                "Captured {} snapshots at {}.",
                outcome.inserted,
                outcome.captured_at.to_rfc3339()
            );
        }
        Commands::Export { search, out } => {
            let actor = cli.actor.actor()?;
            let thresholds = active_thresholds(&store, config.cgpa_scale).await?;
            let csv =
                service::export_students(&store, &thresholds, &actor, search.as_deref()).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(export::export_file_name(Utc::now())));
            std::fs::write(&out, csv)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Export written to {}.", out.display());
        }
        Commands::Report { out } => {
            let actor = cli.actor.actor()?;
            let thresholds = active_thresholds(&store, config.cgpa_scale).await?;
            let students = service::visible_students(&store, &actor).await?;
            let scope = (actor.role != Role::Admin).then(|| format!("{} {}", actor.role, actor.id));
            let report = report::build_report(scope.as_deref(), Utc::now(), &students, &thresholds);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::RiskConfig { action } => match action {
            RiskConfigAction::Show => {
                let model = service::load_risk_model(&store, config.cgpa_scale).await?;
                let w = model.weights;
                println!(
                    "weights: attendance {:.2}, gpa {:.2}, assignments {:.2}, notes {:.2}",
                    w.attendance, w.gpa, w.assignments, w.notes
                );
                println!(
                    "thresholds: high {:.2}, medium {:.2}",
                    model.thresholds.high, model.thresholds.medium
                );
                println!("cgpa scale: {}", model.cgpa_scale);
            }
            RiskConfigAction::Set {
                attendance,
                gpa,
                assignments,
                notes,
                high,
                medium,
            } => {
                let actor = cli.actor.actor()?;
                let weights = RiskWeights {
                    attendance,
                    gpa,
                    assignments,
                    notes,
                };
                let thresholds = RiskThresholds { high, medium };
                let saved = service::save_risk_model(&store, &actor, weights, thresholds).await?;
                println!("Risk model version {} is now active.", saved.version);
            }
        },
    }

    Ok(())
}

async fn active_thresholds(store: &PgStore, cgpa_scale: f64) -> anyhow::Result<RiskThresholds> {
    Ok(service::load_risk_model(store, cgpa_scale).await?.thresholds)
}
