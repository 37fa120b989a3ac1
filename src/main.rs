use actix_web::web::{Data, Json};
use actix_web::{get, post, middleware, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::Parser;
use chaos_operator::admission;
use chaos_operator::config::Config;
use chaos_operator::operator::Operator;
use prometheus::{Encoder, TextEncoder};
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

#[get("/metrics")]
async fn metrics(c: Data<Operator>, _req: HttpRequest) -> impl Responder {
    let metric_families = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    HttpResponse::Ok().body(buffer)
}

/// Liveness: the process is up and serving requests.
#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

/// Readiness: this replica holds the leader-election lease and has
/// completed its initial list of `ChaosExperiment`s. A non-leader replica deliberately
/// reports not-ready so it's pulled out of any health-gated rollout decisions.
#[get("/readyz")]
async fn readyz(c: Data<Operator>, _req: HttpRequest) -> impl Responder {
    if c.is_ready().await {
        HttpResponse::Ok().json("ready")
    } else {
        HttpResponse::ServiceUnavailable().json("not ready")
    }
}

#[get("/")]
async fn index(c: Data<Operator>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

/// `ValidatingWebhookConfiguration` target: the API server posts an
/// `AdmissionReview` here and expects one back synchronously.
#[post("/validate")]
async fn validate(c: Data<Operator>, body: Json<serde_json::Value>) -> impl Responder {
    let response = admission::handle_webhook_request(body.into_inner(), &c.dependencies()).await;
    HttpResponse::Ok().json(response)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = Config::parse();

    #[cfg(feature = "telemetry")]
    let telemetry = tracing_opentelemetry::layer().with_tracer(chaos_operator::telemetry::init_tracer().await);
    let logger = tracing_subscriber::fmt::layer();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    #[cfg(feature = "telemetry")]
    let collector = Registry::default().with(telemetry).with(logger).with(env_filter);
    #[cfg(not(feature = "telemetry"))]
    let collector = Registry::default().with(logger).with(env_filter);

    tracing::subscriber::set_global_default(collector).expect("set tracing subscriber");

    let bind_address = config.metrics_bind_address.clone();
    let (operator, controller) = Operator::new(config).await;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(operator.clone()))
            .wrap(middleware::Logger::default().exclude("/health").exclude("/readyz"))
            .service(index)
            .service(health)
            .service(readyz)
            .service(metrics)
            .service(validate)
    })
    .bind(&bind_address)
    .unwrap_or_else(|e| panic!("cannot bind to {bind_address}: {e}"))
    .shutdown_timeout(5);

    tokio::select! {
        _ = controller => warn!("controller exited"),
        result = server.run() => {
            if let Err(e) = result {
                warn!(error = %e, "actix exited with error");
            } else {
                info!("actix exited");
            }
        }
    }

    Ok(())
}
