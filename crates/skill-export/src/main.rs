// skill-export/crates/skill-export/src/main.rs

#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use clap::{Parser, ValueEnum};
#[cfg(feature = "cli")]
use skill_export::{
    sink, telemetry, Config, ExportDatabase, ExportPipeline, ProjectionMode, SessionId,
};
#[cfg(feature = "cli")]
use tracing::info;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Nested per-session records with an export envelope
    Json,
    /// One row per (session, experience, skill)
    Csv,
}

#[cfg(feature = "cli")]
impl OutputFormat {
    fn mode(self) -> ProjectionMode {
        match self {
            OutputFormat::Json => ProjectionMode::Nested,
            OutputFormat::Csv => ProjectionMode::Flat,
        }
    }

    fn default_path(self) -> PathBuf {
        match self {
            OutputFormat::Json => PathBuf::from("user_skills_export.json"),
            OutputFormat::Csv => PathBuf::from("user_skills_export.csv"),
        }
    }
}

/// Export the skills extracted for each conversation session.
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "skill-export", version, about)]
struct Cli {
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Output file; defaults to user_skills_export.<format>
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Restrict the export to these session ids (repeatable)
    #[arg(long = "session", value_name = "ID")]
    sessions: Vec<SessionId>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("info");
    let cli = Cli::parse();

    let cfg = Config::from_env()?;
    cfg.print_config();

    let db = ExportDatabase::open(&cfg.database_path)?;
    let pipeline = ExportPipeline::from_database(db, cfg.resolver_config());

    let mode = cli.format.mode();
    let projection = if cli.sessions.is_empty() {
        pipeline.run_all(mode).await?
    } else {
        info!("Exporting {} requested sessions", cli.sessions.len());
        pipeline.run(&cli.sessions, mode).await?
    };

    let output = cli.output.unwrap_or_else(|| cli.format.default_path());
    sink::write_projection(&projection, &output, &cfg.database_name)?;
    Ok(())
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_flag() {
        let cli = Cli::try_parse_from(["skill-export", "--format", "csv", "-o", "out.csv"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Csv);
        assert_eq!(cli.output, Some(PathBuf::from("out.csv")));
    }

    #[test]
    fn test_defaults_and_repeated_sessions() {
        let cli = Cli::try_parse_from(["skill-export", "--session", "4", "--session", "9"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.output, None);
        assert_eq!(cli.sessions, vec![4, 9]);
        assert_eq!(cli.format.default_path(), PathBuf::from("user_skills_export.json"));
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
