//! Binary entry point: loads settings, builds the repository and
//! orchestrator, and starts the actix-web host.

use std::sync::Arc;

use actix_web::{App, HttpServer};
use luthien_control::orchestrator::Orchestrator;
use luthien_control::repository::InMemoryRepository;
use luthien_control::server::{config_routes, AppState};
use luthien_control::settings::{init_tracing, Settings};
use luthien_control::util::cors_config_from_env;

fn build_http_client(settings: &Settings) -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(settings.http_pool_max_idle_per_host())
        .timeout(std::time::Duration::from_secs(settings.http_timeout_secs()))
        .build()
        .expect("failed to build the shared HTTP client")
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = Arc::new(Settings::from_env()?);
    tracing::info!(
        backend_url = settings.backend_url(),
        top_level_policy = settings.top_level_policy_name(),
        "starting luthien-control"
    );

    let http_client = build_http_client(&settings);

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    let (api_key_repository, policy_repository): (
        Arc<dyn luthien_control::repository::ApiKeyRepository>,
        Arc<dyn luthien_control::repository::PolicyRepository>,
    ) = match settings.database_url() {
        Some(url) => {
            let pool = Arc::new(luthien_control::repository::SqlRepository::connect(url).await?);
            (pool.clone(), pool)
        }
        None => {
            let repo = Arc::new(InMemoryRepository::new());
            (repo.clone(), repo)
        }
    };

    #[cfg(not(any(feature = "sqlite", feature = "postgres")))]
    let (api_key_repository, policy_repository): (
        Arc<dyn luthien_control::repository::ApiKeyRepository>,
        Arc<dyn luthien_control::repository::PolicyRepository>,
    ) = {
        let repo = Arc::new(InMemoryRepository::new());
        (repo.clone(), repo)
    };

    let orchestrator = Arc::new(Orchestrator::new(
        settings.clone(),
        http_client,
        api_key_repository,
        policy_repository,
    ));

    let app_host = settings.app_host().to_string();
    let app_port = settings.app_port();

    HttpServer::new(move || {
        App::new()
            .wrap(cors_config_from_env())
            .app_data(actix_web::web::Data::new(AppState { orchestrator: orchestrator.clone() }))
            .configure(config_routes)
    })
    .bind((app_host, app_port))?
    .run()
    .await?;

    Ok(())
}
