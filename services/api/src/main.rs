use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Result;
use tracing::info;
use tracing_actix_web::TracingLogger;

use api_service::{handlers, webhook, AppState};
use shared::Settings;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::from_env()?;
    shared::init_tracing(&settings.log_level);

    info!(
        "Starting lifecycle API on {}:{}",
        settings.app_host, settings.app_port
    );

    let runtime = engine::bootstrap(&settings).await?;
    info!("Database connected and migrations run");

    let state = web::Data::new(AppState {
        db_pool: runtime.pool.clone(),
        service: runtime.service.clone(),
        forge: runtime.forge.clone(),
        config: runtime.config.clone(),
        webhook_secret: settings.github_webhook_secret.clone(),
    });

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_header()
            .allow_any_method();

        App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .route("/health", web::get().to(handlers::health))
            .route("/api/webhooks/forge", web::post().to(webhook::forge_webhook))
            .service(
                web::scope("/api/v1")
                    .route("/builds", web::get().to(handlers::list_builds))
                    .route("/builds/{uuid}", web::get().to(handlers::get_build))
                    .route("/builds/{uuid}/graph", web::get().to(handlers::get_build_graph))
                    .route("/builds/{uuid}/services", web::get().to(handlers::get_build_services))
                    .route("/builds/{uuid}/summary", web::get().to(handlers::get_build_summary))
                    .route("/builds/{uuid}/deploy", web::post().to(handlers::deploy_build))
                    .route("/builds/{uuid}/torndown", web::patch().to(handlers::teardown_build))
                    .route("/builds/{uuid}/webhooks", web::post().to(handlers::invoke_webhooks))
                    .route("/schema/validate", web::post().to(handlers::validate_schema))
                    .route("/config/cache", web::get().to(handlers::get_config_cache))
                    .route("/config/cache", web::put().to(handlers::refresh_config_cache)),
            )
    })
    .bind((settings.app_host.as_str(), settings.app_port))?
    .run()
    .await?;

    Ok(())
}
