// Ping executor

use std::sync::Arc;
use tokio::time::{Instant, timeout_at};

use super::Prober;
use crate::error::{DiagError, DiagResult};

pub struct PingExecutor {
    prober: Arc<dyn Prober>,
}

impl PingExecutor {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        PingExecutor { prober }
    }

    /// Send `count` echo requests to `target`, giving up at `deadline`
    pub async fn run(&self, target: &str, count: u8, deadline: Instant) -> DiagResult<String> {
        tracing::debug!("ping {} x{}", target, count);

        let output = timeout_at(deadline, self.prober.ping(target, count))
            .await
            .map_err(|_| DiagError::Timeout(format!("ping to {}", target)))??;

        if output.trim().is_empty() {
            return Err(DiagError::Unreachable(format!(
                "ping to {} produced no output",
                target
            )));
        }
        Ok(output)
    }
}
