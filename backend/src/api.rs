use std::io;

use actix_cors::Cors;
use actix_web::{
    error::{JsonPayloadError, QueryPayloadError},
    get, middleware, post,
    web::{self, Data},
    App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use common::req::{Input, IngestRequest, MeasurementRecord};

use crate::{
    config::Config,
    db::{Db, NewMeasurement},
    error::ApiError,
    utils,
};

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

#[get("/healthz")]
async fn healthz() -> impl Responder {
    web::Json(HealthResponse {
        status: "ok",
        db: None,
    })
}

#[get("/readyz")]
async fn readyz(db: web::Data<Db>) -> HttpResponse {
    let db = db.into_inner();
    let status = match web::block(move || db.ping()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match status {
        Ok(()) => HttpResponse::Ok().json(HealthResponse {
            status: "ok",
            db: Some("ready".to_owned()),
        }),
        Err(err) => {
            log::error!("Readiness check failed: {err}");
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "not_ready",
                db: Some("unavailable".to_owned()),
            })
        }
    }
}

#[post("/ingest")]
async fn ingest(
    payload: web::Json<IngestRequest>,
    db: web::Data<Db>,
) -> Result<impl Responder, ApiError> {
    let ingest = payload.into_inner().validate()?;

    // one server timestamp for every row of the request
    let ts_server = utils::now_iso8601();
    let rows: Vec<NewMeasurement> = ingest
        .rows()
        .into_iter()
        .map(|(device_id, value)| NewMeasurement {
            device_id,
            value,
            ts_server: ts_server.clone(),
            ts_client: ingest.ts_client.clone(),
        })
        .collect();

    let db = db.into_inner();
    let inserted = web::block(move || db.insert_measurements(&rows)).await??;

    match &ingest.input {
        Input::Single(value) => log::info!("[INGEST] value={value}, ts_server={ts_server}"),
        Input::Batch(values) => {
            log::info!("[INGEST/BATCH] values={values:?}, ts_server={ts_server}")
        }
    }
    log::debug!("{} stored {inserted} row(s)", ingest.device_id);

    Ok(web::Json(ingest.response()))
}

#[derive(serde::Deserialize, Debug)]
struct LatestParams {
    device_id: String,
}

#[get("/latest")]
async fn latest(
    query: web::Query<LatestParams>,
    db: web::Data<Db>,
) -> Result<impl Responder, ApiError> {
    let device_id = query.into_inner().device_id;
    let db = db.into_inner();
    let lookup = device_id.clone();

    match web::block(move || db.latest(&lookup)).await?? {
        Some(row) => Ok(web::Json(MeasurementRecord::from(row))),
        None => Err(ApiError::NotFound { device_id }),
    }
}

#[derive(serde::Deserialize, Debug)]
struct AllParams {
    device_id: Option<String>,
}

#[get("/all")]
async fn all(query: web::Query<AllParams>, db: web::Data<Db>) -> Result<impl Responder, ApiError> {
    // `?device_id=` means every device
    let device_id = query.into_inner().device_id.filter(|d| !d.is_empty());
    let db = db.into_inner();

    let rows = web::block(move || db.all(device_id.as_deref())).await??;
    let records: Vec<MeasurementRecord> = rows.into_iter().map(MeasurementRecord::from).collect();

    Ok(web::Json(records))
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::Malformed {
        field: "body",
        message: err.to_string(),
    }
    .into()
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::Malformed {
        field: "query",
        message: err.to_string(),
    }
    .into()
}

/// Routes and extractor settings, shared by the server and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .service(healthz)
        .service(readyz)
        .service(ingest)
        .service(latest)
        .service(all);
}

pub async fn new_http_server(config: &Config, db: Db) -> io::Result<()> {
    let db = Data::new(db);
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(db.clone())
            .configure(configure)
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    log::info!("Listening on http://{}:{}", config.bind, config.port);
    server
        .bind((config.bind.as_str(), config.port))?
        .run()
        .await
}
