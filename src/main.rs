use log::{error, info, LevelFilter};
use mixnet_backend::config::Config;
use rocket::Error as RocketError;
use thiserror::Error;

/// Errors that stop the control component from coming up.
#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Launch(#[from] RocketError),
}

async fn run() -> Result<(), Error> {
    info!("Igniting control component...");
    let rocket = mixnet_backend::build().ignite().await?;
    if let Some(config) = rocket.state::<Config>() {
        info!(
            "...tenant {} ready, running nodes {:?} of {}",
            config.tenant_id(),
            config.local_nodes(),
            config.node_count()
        );
    }

    let protocol = if rocket.config().tls_enabled() { "https" } else { "http" };
    let ip = &rocket.config().address;
    let port = &rocket.config().port;
    info!("Mixing control surface listening on {protocol}://{ip}:{port}");
    // Rocket's own request logging is replaced by `LoggerFairing`.
    log4rs_dynamic_filters::DynamicLevelFilter::set("rocket", LevelFilter::Off);
    let _ = rocket.launch().await?;
    Ok(())
}

#[rocket::main]
async fn main() {
    log4rs::init_file("log4rs.yaml", log4rs_dynamic_filters::default_deserializers())
        .expect("Failed to initialise logging");
    info!("Initialised logging");

    if let Err(err) = run().await {
        error!("{err}");
        error!("Critical failure, shutting down");
        std::process::exit(1)
    }
}
