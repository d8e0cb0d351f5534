use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, TextEncoder};
use tracing::info;

use stateless_pg_operator::control_plane::{ControlPlaneServer, JwtManager, TLS_CERT_PATH, TLS_KEY_PATH};
use stateless_pg_operator::controllers::{self, State};
use stateless_pg_operator::util::{meta, telemetry};

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&metrics, &mut buffer).unwrap();
    HttpResponse::Ok().body(buffer)
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider()).ok();

    // Fails the process before any controller runs when the downward-API
    // injection is missing
    info!("operator namespace: {}", meta::operator_namespace());

    // Control-plane companion: JWT keys are a hard startup requirement, TLS
    // material is not (the server downgrades to HTTP without it)
    let jwt = JwtManager::from_key_files()?;
    let enable_tls = std::env::var("CONTROL_PLANE_ENABLE_TLS").map(|v| v == "true").unwrap_or(false);
    let control_plane = ControlPlaneServer::new(enable_tls, TLS_CERT_PATH, TLS_KEY_PATH, jwt).bind()?;

    // Initialize Kubernetes controller state
    let state = State::default();
    let controller_loops = controllers::run(state.clone());

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind("0.0.0.0:8080")?
    .shutdown_timeout(5);

    // All three runtimes implement graceful shutdown; poll until all are done
    let (_, web, control_plane) = tokio::join!(controller_loops, server.run(), control_plane);
    web?;
    control_plane?;
    Ok(())
}
