use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::alerts::DEFAULT_ALERT_THRESHOLD;

/// Settings for the HTTP service, from flags or environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "student-performance")]
#[command(about = "Student performance tracker: aggregation, marks prediction and at-risk alerts", long_about = None)]
pub struct AppConfig {
    #[arg(long, env = "SPT_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "SPT_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Where the trained model artifact is stored
    #[arg(long, env = "SPT_MODEL_PATH", default_value = "models/rf_model.json")]
    pub model_path: PathBuf,

    /// Marks below this value raise an alert
    #[arg(long, env = "SPT_ALERT_THRESHOLD", default_value_t = DEFAULT_ALERT_THRESHOLD)]
    pub alert_threshold: f64,

    /// CSV imported and trained on at startup
    #[arg(long, env = "SPT_SEED_CSV")]
    pub seed_csv: Option<PathBuf>,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

/// Installs the global tracing subscriber. Safe to call more than once.
pub fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
