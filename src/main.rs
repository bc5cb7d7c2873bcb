use app_core_provision::Provisioner;
use app_core_provision::config::Config;
use mimalloc::MiMalloc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    let server_url = cfg.server.redacted_url(&cfg.server.maintenance_db)?;
    info!(
        server = %server_url,
        database = %cfg.database.name,
        owner = %cfg.database.owner,
        extensions = ?cfg.database.extensions,
        dry_run = cfg.basic.dry_run,
        loglevel = %cfg.basic.loglevel
    );

    let provisioner = Provisioner::new(&cfg)?;

    if cfg.basic.dry_run {
        print!("{}", provisioner.plan().to_script());
        return Ok(());
    }

    let mut session = provisioner.run().await.inspect_err(|e| {
        error!(error = %e, "provisioning aborted");
    })?;

    if cfg.basic.verify {
        let report = provisioner.verify(&mut session).await.inspect_err(|e| {
            error!(error = %e, "verification failed");
        })?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    session.close().await?;
    info!(database = %cfg.database.name, "provisioning complete");
    Ok(())
}
