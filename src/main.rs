use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use school_grade_stats::config::AppConfig;
use school_grade_stats::db::{self, PgGradeSource};
use school_grade_stats::report;
use school_grade_stats::service::StatisticsService;
use school_grade_stats::source::{GradeSource, MemorySource};

#[derive(Parser)]
#[command(name = "school-grade-stats")]
#[command(about = "Achievement and course risk statistics for school dashboards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import grade records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Achievement distribution per school
    Distribution {
        #[arg(long)]
        school: Option<Uuid>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Courses ranked by share of students at risk
    CourseRisk {
        #[arg(long)]
        school: Option<Uuid>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Performance per classroom grade within one school
    Performance {
        #[arg(long)]
        school: Uuid,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct OutputArgs {
    #[arg(long, value_enum, default_value_t = Format::Markdown)]
    format: Format,
    /// Write to this file instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
    /// Read a flat grade export instead of the database
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

enum Request {
    Distribution(Option<Uuid>),
    CourseRisk(Option<Uuid>),
    Performance(Uuid),
}

fn init_logging(cfg: &AppConfig) {
    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if cfg.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect(cfg: &AppConfig) -> anyhow::Result<PgPool> {
    let database_url = cfg
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn scope_label(school: Option<Uuid>) -> String {
    match school {
        Some(id) => format!("school {id}"),
        None => "all schools".to_string(),
    }
}

async fn render<S: GradeSource>(
    service: &StatisticsService<S>,
    request: Request,
    format: Format,
) -> anyhow::Result<String> {
    let generated = Utc::now();
    let text = match request {
        Request::Distribution(school) => {
            let result = service.get_school_distribution(school).await?;
            match format {
                Format::Json => serde_json::to_string_pretty(&result)?,
                Format::Markdown => {
                    report::render_distribution(&result, &scope_label(school), generated)
                }
            }
        }
        Request::CourseRisk(school) => {
            let result = service.get_course_risk(school).await?;
            match format {
                Format::Json => serde_json::to_string_pretty(&result)?,
                Format::Markdown => {
                    report::render_course_risk(&result, &scope_label(school), generated)
                }
            }
        }
        Request::Performance(school) => {
            let result = service.get_grade_performance(school).await?;
            match format {
                Format::Json => serde_json::to_string_pretty(&result)?,
                Format::Markdown => {
                    report::render_performance(&result, &scope_label(Some(school)), generated)
                }
            }
        }
    };
    Ok(text)
}

async fn run_report(cfg: &AppConfig, request: Request, output: OutputArgs) -> anyhow::Result<()> {
    let text = match &output.csv {
        Some(path) => {
            let source = MemorySource::from_csv(path)?;
            tracing::info!(source = source.backend_tag(), path = %path.display(), "using flat export");
            render(&StatisticsService::new(source), request, output.format).await?
        }
        None => {
            let pool = connect(cfg).await?;
            render(
                &StatisticsService::new(PgGradeSource::new(pool)),
                request,
                output.format,
            )
            .await?
        }
    };

    match output.out {
        Some(path) => {
            std::fs::write(&path, text)?;
            println!("Report written to {}.", path.display());
        }
        None => println!("{}", text.trim_end()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::from_env();
    init_logging(&cfg);

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&cfg).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&cfg).await?;
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} grade records).");
        }
        Commands::Import { csv } => {
            let pool = connect(&cfg).await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} grade records from {}.", csv.display());
        }
        Commands::Distribution { school, output } => {
            run_report(&cfg, Request::Distribution(school), output).await?;
        }
        Commands::CourseRisk { school, output } => {
            run_report(&cfg, Request::CourseRisk(school), output).await?;
        }
        Commands::Performance { school, output } => {
            run_report(&cfg, Request::Performance(school), output).await?;
        }
    }

    Ok(())
}
