use gateway_api::{config::ApiConfig, startup::Application};
use gateway_config::{Environment, load_config};
use gateway_telemetry::tracing::init_tracing;
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    // Initialize tracing from the binary name
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    // Initialize Sentry before the async runtime starts
    let _sentry_guard = init_sentry()?;

    actix_web::rt::System::new().block_on(async_main())?;

    Ok(())
}

async fn async_main() -> anyhow::Result<()> {
    let config = load_config::<ApiConfig>()?;
    config.validate()?;

    info!(
        namespace = config.control_plane.namespace,
        store_name = config.control_plane.store_name,
        seed_path = config.control_plane.seed_path,
        "credential store options",
    );
    info!("application settings:\n{}", config.application);

    let application = Application::build(config).await?;
    info!(port = application.port(), "gateway listening");
    application.run_until_stopped().await?;

    Ok(())
}

fn init_sentry() -> anyhow::Result<Option<sentry::ClientInitGuard>> {
    if let Ok(config) = load_config::<ApiConfig>()
        && let Some(sentry_config) = &config.sentry
    {
        info!("initializing sentry with supplied dsn");

        let environment = Environment::load()?;
        let guard = sentry::init(sentry::ClientOptions {
            dsn: Some(sentry_config.dsn.parse()?),
            environment: Some(environment.to_string().into()),
            traces_sample_rate: 1.0,
            integrations: vec![Arc::new(
                sentry::integrations::panic::PanicIntegration::new(),
            )],
            ..Default::default()
        });

        sentry::configure_scope(|scope| {
            scope.set_tag("service", "gateway-api");
        });

        return Ok(Some(guard));
    }

    info!("sentry not configured for gateway-api, skipping initialization");

    Ok(None)
}
