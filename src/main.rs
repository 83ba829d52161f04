use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::Level;

use lector_adapters::{HttpAdapterConfig, HttpGenerationClient};
use lector_engine::OrchestratorConfig;
use lector_server::{ServerConfig, Services};
use lector_store::{Database, SqliteAssetStore, SqliteLectureStore};
use lector_telemetry::{LogFormat, TelemetryConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogStyle {
    Json,
    Pretty,
}

/// Lecture generation server.
#[derive(Debug, Parser)]
#[command(name = "lector", version)]
struct Args {
    #[arg(long, env = "LECTOR_PORT", default_value_t = 9091)]
    port: u16,

    /// Directory for the database. Defaults to ~/.lector.
    #[arg(long, env = "LECTOR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Base URL of the generation service.
    #[arg(long, env = "LECTOR_GENERATOR_URL", default_value = "http://127.0.0.1:8700")]
    generator_url: String,

    #[arg(long, env = "LECTOR_GENERATOR_TIMEOUT_SECS", default_value_t = 120)]
    generator_timeout_secs: u64,

    #[arg(long, env = "LECTOR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "LECTOR_IMAGE_CONCURRENCY", default_value_t = 15)]
    image_concurrency: usize,

    #[arg(long, env = "LECTOR_DIAGRAM_CONCURRENCY", default_value_t = 32)]
    diagram_concurrency: usize,

    #[arg(long, env = "LECTOR_VOICEOVER_CONCURRENCY", default_value_t = 32)]
    voiceover_concurrency: usize,

    #[arg(long, env = "LECTOR_CACHE_TTL_SECS", default_value_t = 300)]
    cache_ttl_secs: u64,

    #[arg(long, env = "LECTOR_CACHE_CAPACITY", default_value_t = 1024)]
    cache_capacity: u64,

    #[arg(long, env = "LECTOR_LOG_LEVEL", default_value_t = Level::INFO)]
    log_level: Level,

    /// Per-module level overrides, e.g. `lector_engine=debug`.
    #[arg(long = "log-module", env = "LECTOR_LOG_MODULES", value_delimiter = ',', value_parser = parse_module_level)]
    log_modules: Vec<(String, Level)>,

    #[arg(long, env = "LECTOR_LOG_FORMAT", value_enum, default_value_t = LogStyle::Json)]
    log_format: LogStyle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = lector_telemetry::init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        module_levels: args.log_modules.clone(),
        format: match args.log_format {
            LogStyle::Json => LogFormat::Json,
            LogStyle::Pretty => LogFormat::Pretty,
        },
    });

    tracing::info!("starting lector");

    let data_dir = args.data_dir.clone().unwrap_or_else(|| dirs_home().join(".lector"));
    let db_dir = data_dir.join("database");
    std::fs::create_dir_all(&db_dir).with_context(|| format!("creating {}", db_dir.display()))?;
    let db_path = db_dir.join("lectures.db");

    let db = Database::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    let generator = Arc::new(
        HttpGenerationClient::new(HttpAdapterConfig {
            base_url: args.generator_url.clone(),
            timeout: Duration::from_secs(args.generator_timeout_secs),
            api_key: args.api_key.clone(),
        })
        .context("building generation client")?,
    );

    let services = Services {
        lectures: Arc::new(SqliteLectureStore::new(db.clone())),
        assets: SqliteAssetStore::new(db),
        classifier: generator.clone(),
        planner: generator.clone(),
        diagrams: generator.clone(),
        images: generator.clone(),
        voiceover: generator,
        orchestrator: OrchestratorConfig {
            image_capacity: args.image_concurrency,
            diagram_capacity: args.diagram_concurrency,
            voiceover_capacity: args.voiceover_concurrency,
        },
        metrics: telemetry.metrics(),
    };
    let config = ServerConfig {
        port: args.port,
        cache_ttl_secs: args.cache_ttl_secs,
        cache_capacity: args.cache_capacity,
        ..Default::default()
    };

    let handle = lector_server::start(config, services)
        .await
        .context("starting server")?;
    tracing::info!(port = handle.port, generator = %args.generator_url, "lector ready");

    tokio::signal::ctrl_c().await.context("listening for ctrl+c")?;
    tracing::info!("shutting down");
    Ok(())
}

fn parse_module_level(raw: &str) -> Result<(String, Level), String> {
    let (module, level) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <module>=<level>, got '{raw}'"))?;
    let level = level.parse::<Level>().map_err(|e| e.to_string())?;
    Ok((module.trim().to_string(), level))
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
