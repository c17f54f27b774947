use crate::backend::{RecordBackend, TableSpec};
use crate::errors::{Error, Result};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, info};

pub const DEFAULT_TABLE_WAIT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long to wait for a new table and how often to check on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl WaitPolicy {
    /// The poll interval drives a periodic timer and must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidWaitPolicy(
                "poll interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TABLE_WAIT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Creates the secret table and waits for it to become active. A failed
/// create is returned as is, without polling.
pub async fn create_and_wait<B>(backend: &B, spec: &TableSpec, policy: WaitPolicy) -> Result<()>
where
    B: RecordBackend + ?Sized,
{
    policy.validate()?;
    backend.create_table(spec).await?;
    info!(
        table = %spec.name,
        read_capacity = spec.read_capacity,
        write_capacity = spec.write_capacity,
        "created table"
    );
    wait_until_active(backend, &spec.name, policy).await
}

/// Polls the table status every `policy.interval`, starting one interval
/// from now. The timeout wins over a poll that falls due at the same instant.
pub async fn wait_until_active<B>(backend: &B, table: &str, policy: WaitPolicy) -> Result<()>
where
    B: RecordBackend + ?Sized,
{
    policy.validate()?;
    let deadline = sleep(policy.timeout);
    tokio::pin!(deadline);
    let mut ticker = interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                return Err(Error::Timeout {
                    table: table.to_string(),
                    waited: policy.timeout,
                });
            }
            _ = ticker.tick() => {
                let status = backend.describe_table_status(table).await?;
                if status.is_active() {
                    info!(table, "table is active");
                    return Ok(());
                }
                debug!(table, ?status, "waiting for table");
            }
        }
    }
}
