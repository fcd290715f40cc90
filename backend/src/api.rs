//! HTTP surface: `/oracle`, `/mint`, `/upload`, `/metadata`, plus the
//! `/health` and `/status` probes.
//!
//! Every failure body is `{ "ok": false, "error": "..." }`.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

use crate::config::AppConfig;
use crate::error::OracleError;
use crate::fulfiller::{Fulfiller, MintRequest};
use crate::metadata::{preview_document, MetadataStore};
use crate::metrics::Metrics;
use crate::oracle::{OracleInput, OracleService, DEFAULT_NAME};
use crate::uploader::metadata_url_for_id;

/// Shared application state accessible from HTTP handlers.
pub struct AppState {
    pub config: AppConfig,
    pub oracle: Arc<OracleService>,
    pub fulfiller: Arc<Fulfiller>,
    pub store: Arc<dyn MetadataStore>,
    pub metrics: Arc<Metrics>,
}

/// `{ "ok": true, ...body }`
#[derive(Serialize)]
struct Success<T: Serialize> {
    ok: bool,
    #[serde(flatten)]
    body: T,
}

fn success<T: Serialize>(body: T) -> HttpResponse {
    HttpResponse::Ok().json(Success { ok: true, body })
}

/// `PUBLIC_BASE_URL` if set, else the origin the request came in on.
fn base_url(config: &AppConfig, req: &HttpRequest) -> String {
    match &config.public_base_url {
        Some(url) => url.clone(),
        None => {
            let info = req.connection_info();
            format!("{}://{}", info.scheme(), info.host())
        }
    }
}

async fn oracle(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<OracleInput>,
) -> Result<HttpResponse, OracleError> {
    data.metrics.record_oracle_request();
    let started = Instant::now();
    let base = base_url(&data.config, &req);

    match data.oracle.generate(&body, &base).await {
        Ok(output) => {
            data.metrics.record_fortune();
            if !data.config.mock_enabled {
                data.metrics
                    .record_fulfillment(started.elapsed().as_millis() as u64);
            }
            Ok(success(output))
        }
        Err(e) => {
            data.metrics.record_failure();
            error!(error = %e, "Oracle request failed");
            Err(e)
        }
    }
}

async fn mint(data: web::Data<AppState>, body: web::Json<MintRequest>) -> HttpResponse {
    let started = Instant::now();
    match data.fulfiller.mint_and_fulfill(&body).await {
        Ok(outcome) => {
            data.metrics
                .record_fulfillment(started.elapsed().as_millis() as u64);
            success(outcome)
        }
        Err(e) => {
            data.metrics.record_failure();
            error!(error = %e, "Mint failed");
            // Every /mint failure is reported as 500.
            HttpResponse::from_error(OracleError::Upstream(e.to_string()))
        }
    }
}

#[derive(Serialize)]
struct UploadResponse {
    url: String,
}

async fn upload(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, OracleError> {
    let metadata = match body.into_inner() {
        serde_json::Value::Object(mut fields) => fields.remove("metadata"),
        _ => None,
    };
    let Some(metadata @ serde_json::Value::Object(_)) = metadata else {
        warn!("Upload without metadata object");
        return Err(OracleError::Validation("metadata is required".into()));
    };

    let id = data.store.put(metadata);
    data.metrics.record_upload();
    let url = metadata_url_for_id(&base_url(&data.config, &req), &id);
    Ok(success(UploadResponse { url }))
}

#[derive(Deserialize, Debug)]
struct MetadataQuery {
    id: Option<String>,
    name: Option<String>,
    desc: Option<String>,
}

async fn metadata(
    data: web::Data<AppState>,
    query: web::Query<MetadataQuery>,
) -> Result<HttpResponse, OracleError> {
    let query = query.into_inner();
    if let Some(id) = query.id.filter(|id| !id.is_empty()) {
        return data
            .store
            .get(&id)
            .map(|record| HttpResponse::Ok().json(record))
            .ok_or_else(|| OracleError::NotFound("metadata not found".into()));
    }
    let name = query.name.unwrap_or_else(|| DEFAULT_NAME.to_string());
    let desc = query.desc.unwrap_or_default();
    Ok(HttpResponse::Ok().json(preview_document(&name, &desc)))
}

/// Liveness probe.
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Service counters and the number of minted-but-unfulfilled requests.
async fn status(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "running",
        "pending_fulfillments": data.fulfiller.pending_count(),
        "metrics": data.metrics.to_json(),
    }))
}

/// Malformed JSON bodies get the error envelope. `/mint` reports them as 500
/// like every other failure on that route.
fn json_config(as_server_error: bool) -> web::JsonConfig {
    web::JsonConfig::default().error_handler(move |err, _req| {
        let message = err.to_string();
        warn!(error = %message, "Rejected request body");
        if as_server_error {
            OracleError::Upstream(message).into()
        } else {
            OracleError::Validation(message).into()
        }
    })
}

/// Register every route on an actix `App`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config(false))
        .service(
            web::resource("/mint")
                .app_data(json_config(true))
                .route(web::post().to(mint)),
        )
        .route("/oracle", web::post().to(oracle))
        .route("/upload", web::post().to(upload))
        .route("/metadata", web::get().to(metadata))
        .route("/health", web::get().to(health))
        .route("/status", web::get().to(status));
}
