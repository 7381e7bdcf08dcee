use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use pubsub_custom_metrics::clients::ClientProvider;
use pubsub_custom_metrics::config::Config;
use pubsub_custom_metrics::events;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    pubsub_custom_metrics::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::load_from_env().await.inspect_err(|e| {
        error!("failed to load configuration: {}", e);
    })?;
    let clients = ClientProvider::from_config(&config);

    let config = &config;
    let clients = &clients;
    run(service_fn(move |request: LambdaEvent<events::Combined>| async move {
        pubsub_custom_metrics::function_handler(clients, config, request)
            .await
            .map_err(|e| {
                if e.is_fatal() {
                    error!("{}", e);
                    std::process::exit(1);
                }
                Error::from(e)
            })
    }))
    .await
}
