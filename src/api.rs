use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::aggregate::{merge, FeatureTable, FeatureVector};
use crate::alerts::{generate_alerts, personalized_recommendation};
use crate::analytics::DashboardAnalyzer;
use crate::data::RawTable;
use crate::error::{PipelineError, Result};
use crate::model::{predict_for_aggregated, train_model, ModelStore, TrainOutcome, TrainingConfig};
use crate::pipeline::build_features;
use crate::preprocess::PreparedRow;

pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Schema(_)
            | PipelineError::Csv(_)
            | PipelineError::Excel(_)
            | PipelineError::Serialization(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

/// Service state: the merged per-student aggregate and the performance rows
/// behind it.
pub struct AppState {
    store: ModelStore,
    training: TrainingConfig,
    alert_threshold: f64,
    students: Mutex<FeatureTable>,
    /// Latest uploaded rows per student. A student present in a new batch
    /// has their earlier rows replaced, matching the aggregate merge.
    history: Mutex<Vec<PreparedRow>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadSummary {
    pub rows: usize,
    pub students_in_batch: usize,
    pub total_students: usize,
    pub subject_columns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionsResponse {
    pub model_available: bool,
    pub students: Vec<FeatureVector>,
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// Case-insensitive substring filter on the student id
    pub q: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AppState {
    pub fn new(store: ModelStore, training: TrainingConfig, alert_threshold: f64) -> Self {
        Self {
            store,
            training,
            alert_threshold,
            students: Mutex::new(FeatureTable::default()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn students(&self) -> FeatureTable {
        lock(&self.students).clone()
    }

    /// Runs a raw batch through the pipeline and merges it into the state.
    pub fn ingest(&self, table: &RawTable) -> Result<UploadSummary> {
        let batch = build_features(table)?;
        let rows = batch.prepared.rows.len();
        let students_in_batch = batch.students.len();
        let subject_columns = batch.students.subject_columns.clone();

        let total_students = {
            let mut students = lock(&self.students);
            let merged = merge(std::mem::take(&mut *students), batch.students);
            *students = merged;
            students.len()
        };
        {
            let mut history = lock(&self.history);
            let incoming: BTreeSet<String> =
                batch.prepared.rows.iter().map(|r| r.student_id.clone()).collect();
            history.retain(|r| !incoming.contains(&r.student_id));
            history.extend(batch.prepared.rows);
        }

        info!(rows, students_in_batch, total_students, "Batch imported");
        Ok(UploadSummary {
            rows,
            students_in_batch,
            total_students,
            subject_columns,
        })
    }

    pub fn train(&self) -> Result<TrainOutcome> {
        train_model(&self.students(), &self.store, &self.training)
    }

    pub fn scored_students(&self) -> FeatureTable {
        predict_for_aggregated(self.students(), &self.store)
    }

    fn student_rows(&self, student_id: &str) -> Vec<PreparedRow> {
        lock(&self.history)
            .iter()
            .filter(|r| r.student_id == student_id)
            .cloned()
            .collect()
    }
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("Student performance service is running!")
}

async fn upload_csv(body: web::Bytes, state: web::Data<AppState>) -> Result<HttpResponse> {
    let table = RawTable::from_csv_reader(&body[..])?;
    let summary = state.ingest(&table)?;
    Ok(HttpResponse::Ok().json(summary))
}

async fn upload_json(body: web::Json<Vec<Value>>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let table = RawTable::from_json_values(&body);
    let summary = state.ingest(&table)?;
    Ok(HttpResponse::Ok().json(summary))
}

async fn upload_excel(body: web::Bytes, state: web::Data<AppState>) -> Result<HttpResponse> {
    let table = RawTable::from_excel_bytes(&body)?;
    let summary = state.ingest(&table)?;
    Ok(HttpResponse::Ok().json(summary))
}

// Training runs on the blocking pool so request workers stay free
async fn train(state: web::Data<AppState>) -> Result<HttpResponse> {
    let state = state.into_inner();
    let outcome = tokio::task::spawn_blocking(move || state.train()).await??;
    Ok(HttpResponse::Ok().json(outcome))
}

async fn predictions(state: web::Data<AppState>) -> HttpResponse {
    let scored = state.scored_students();
    HttpResponse::Ok().json(PredictionsResponse {
        model_available: scored.rows.iter().any(|r| r.predicted_marks.is_some()),
        students: scored.rows,
    })
}

async fn alerts(query: web::Query<AlertQuery>, state: web::Data<AppState>) -> HttpResponse {
    let threshold = query.threshold.unwrap_or(state.alert_threshold);
    let scored = state.scored_students();
    HttpResponse::Ok().json(generate_alerts(&scored, threshold))
}

async fn recommendations(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let student_id = path.into_inner();
    match personalized_recommendation(&state.student_rows(&student_id)) {
        Some(rec) => HttpResponse::Ok().json(rec),
        None => HttpResponse::NotFound().json(json!({ "msg": "No data" })),
    }
}

async fn analytics(state: web::Data<AppState>) -> HttpResponse {
    let scored = state.scored_students();
    let rows = lock(&state.history).clone();
    let dashboard = DashboardAnalyzer::new(state.alert_threshold).generate_dashboard(&scored, &rows);
    HttpResponse::Ok().json(dashboard)
}

async fn export_students(query: web::Query<ExportQuery>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let mut scored = state.scored_students();
    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let q = q.to_lowercase();
        scored.rows.retain(|r| r.student_id.to_lowercase().contains(&q));
    }

    let mut body = Vec::new();
    scored.write_csv(&mut body)?;
    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(("Content-Disposition", "attachment; filename=\"students.csv\""))
        .body(body))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(MAX_UPLOAD_BYTES))
        .app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
        .route("/health", web::get().to(health_check))
        .route("/upload/csv", web::post().to(upload_csv))
        .route("/upload/json", web::post().to(upload_json))
        .route("/upload/excel", web::post().to(upload_excel))
        .route("/model/train", web::post().to(train))
        .route("/predictions", web::get().to(predictions))
        .route("/alerts", web::get().to(alerts))
        .route("/students/{id}/recommendations", web::get().to(recommendations))
        .route("/analytics", web::get().to(analytics))
        .route("/export/students.csv", web::get().to(export_students));
}
