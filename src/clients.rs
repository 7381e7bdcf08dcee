use crate::config::Config;
use crate::metrics::monitoring::{DynTimeSeriesWriter, MonitoringClient, MonitoringError};
use crate::metrics::process::PipelineError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

type WriterFactory =
    Box<dyn Fn() -> BoxFuture<'static, Result<DynTimeSeriesWriter, MonitoringError>> + Send + Sync>;

/// Lazily builds the time series writer shared by every invocation.
///
/// The factory runs at most once for the lifetime of the provider. Concurrent callers
/// wait on the same construction and all observe its outcome, including a failure, which
/// is kept rather than retried.
pub struct ClientProvider {
    writer: OnceCell<Result<DynTimeSeriesWriter, Arc<MonitoringError>>>,
    factory: WriterFactory,
}

impl ClientProvider {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DynTimeSeriesWriter, MonitoringError>> + Send + 'static,
    {
        ClientProvider {
            writer: OnceCell::new(),
            factory: Box::new(move || factory().boxed()),
        }
    }

    /// A provider that builds a [MonitoringClient] from `config` on first use.
    pub fn from_config(config: &Config) -> Self {
        let config = config.clone();
        ClientProvider::new(move || {
            let config = config.clone();
            async move {
                let client = MonitoringClient::new(&config).await?;
                info!(
                    endpoint = %config.monitoring_endpoint,
                    auth = %config.monitoring_auth,
                    "monitoring client created"
                );
                Ok::<DynTimeSeriesWriter, MonitoringError>(Arc::new(client))
            }
        })
    }

    pub async fn get(&self) -> Result<DynTimeSeriesWriter, PipelineError> {
        let writer = self
            .writer
            .get_or_init(|| async { (self.factory)().await.map_err(Arc::new) })
            .await;
        match writer {
            Ok(writer) => Ok(writer.clone()),
            Err(e) => Err(PipelineError::ClientInit(e.clone())),
        }
    }
}
