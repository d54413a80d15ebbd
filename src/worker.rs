use crate::config::Config;
use crate::engine::helper::HelperBroker;
use crate::engine::process::{SofficeLauncher, resolve_soffice_exe};
use crate::engine::ConnectionDescriptor;
use crate::error::ConversionError;
use crate::executor::{ConversionRequest, Converted, Executor};
use crate::resolver::FilterTable;
use crate::supervisor::{Connection, EngineState, RetryPolicy, Supervisor};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// One engine, one conversion at a time.
///
/// Scale out by running more workers, each with its own port.
pub struct Worker {
    supervisor: Mutex<Supervisor>,
    executor: Executor,
}

impl Worker {
    pub fn new(supervisor: Supervisor, executor: Executor) -> Self {
        Self {
            supervisor: Mutex::new(supervisor),
            executor,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let launcher = SofficeLauncher::new(
            resolve_soffice_exe(&cfg.engine.soffice_exe),
            cfg.engine.extra_args.clone(),
        );
        let broker = HelperBroker::from_config(cfg);
        let descriptor =
            ConnectionDescriptor::new(&cfg.engine.host, cfg.engine.port, &cfg.engine.protocol);
        let supervisor = Supervisor::new(
            Arc::new(launcher),
            Arc::new(broker),
            descriptor,
            RetryPolicy::from_config(cfg),
        );
        Self::new(
            supervisor,
            Executor::new(FilterTable::default(), cfg.export.clone()),
        )
    }

    pub async fn convert(&self, req: &ConversionRequest) -> Result<Converted, ConversionError> {
        let mut supervisor = self.supervisor.lock().await;
        let conn = supervisor.ensure().await?;
        let result = self.executor.convert(&conn, req).await;

        match result {
            Ok(done) => {
                info!(
                    "converted {} with {} -> {} ({} bytes)",
                    req.input.display(),
                    done.input_filter,
                    done.export_filter,
                    done.output_bytes
                );
                Ok(done)
            }
            Err(err @ ConversionError::Timeout { .. }) => {
                // The abandoned call only unwinds once the engine is gone.
                warn!("killing engine after timeout");
                supervisor.shutdown().await;
                Err(err)
            }
            Err(ConversionError::Process(reason)) => {
                warn!("engine lost during conversion: {reason}");
                supervisor.shutdown().await;
                Err(ConversionError::Process(reason))
            }
            Err(err) => {
                if !supervisor.is_alive() {
                    warn!("engine died during conversion: {err}");
                    supervisor.shutdown().await;
                    return Err(ConversionError::Process(format!(
                        "engine exited during conversion ({err})"
                    )));
                }
                Err(err)
            }
        }
    }

    pub async fn ensure_ready(&self) -> Result<Connection, ConversionError> {
        self.supervisor.lock().await.ensure().await
    }

    pub async fn state(&self) -> EngineState {
        self.supervisor.lock().await.state()
    }

    pub async fn shutdown(&self) {
        self.supervisor.lock().await.shutdown().await;
    }
}
