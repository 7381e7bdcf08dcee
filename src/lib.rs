use lambda_runtime::LambdaEvent;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::clients::ClientProvider;
use crate::config::Config;
use crate::metrics::process::PipelineError;

pub mod clients;
pub mod config;
pub mod events;
pub mod metrics;

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

// lambda handler
pub async fn function_handler(
    clients: &ClientProvider,
    config: &Config,
    evt: LambdaEvent<events::Combined>,
) -> Result<(), PipelineError> {
    info!("Handling invocation {}", evt.context.request_id);

    let writer = clients.get().await?;

    let message = evt.payload.into_message();
    debug!(
        message_id = ?message.id(),
        publish_time = ?message.published_at(),
        attributes = ?message.attributes,
        bytes = message.data.len(),
        "decoded message"
    );

    metrics::process::process_event(config, writer.as_ref(), &message.data).await?;
    Ok(())
}
