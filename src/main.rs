use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use student_performance::api::{routes, AppState};
use student_performance::config::{init_logging, AppConfig};
use student_performance::{ModelStore, RawTable, TrainOutcome, TrainingConfig};

async fn start_api(state: web::Data<AppState>, host: String, port: u16) -> std::io::Result<()> {
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
        .bind((host.as_str(), port))?
        .run()
        .await
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    init_logging(&config.log_filter);

    let store = ModelStore::new(&config.model_path);
    let state = web::Data::new(AppState::new(
        store,
        TrainingConfig::default(),
        config.alert_threshold,
    ));

    if let Some(path) = &config.seed_csv {
        info!(path = %path.display(), "Loading student data");
        let table = RawTable::from_csv_path(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let summary = state.ingest(&table)?;
        info!(students = summary.total_students, "Student data loaded");

        let seeded = state.clone().into_inner();
        match tokio::task::spawn_blocking(move || seeded.train()).await?? {
            TrainOutcome::Trained(report) => {
                info!(validation_mse = report.validation_mse, "Startup model ready")
            }
            TrainOutcome::NotTrained { students } => {
                warn!(students, "Not enough students for a startup model")
            }
        }
    } else if !state.store().exists() {
        warn!(path = %config.model_path.display(), "No model yet; predictions stay empty until one is trained");
    }

    info!(host = %config.host, port = config.port, "Starting student performance API");
    start_api(state, config.host, config.port).await?;
    Ok(())
}
