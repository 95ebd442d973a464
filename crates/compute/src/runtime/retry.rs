//! Connection retry with exponential backoff.

use std::future::Future;

use ripple_connector::ConnectorError;
use ripple_core::RetryConfig;
use tokio::sync::watch;
use tracing::warn;

use super::RunState;

/// Try `open` up to `retry.connect_attempts` times. The last error is
/// returned once attempts are exhausted.
pub(crate) async fn connect<T, F, Fut>(retry: &RetryConfig, label: &str, mut open: F) -> Result<T, ConnectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let attempts = retry.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match open().await {
            Ok(endpoint) => return Ok(endpoint),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                let delay = retry.backoff(attempt);
                warn!(
                    connector = label,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Sleep the backoff for `attempt`, waking early if the job stops. False
/// once it has stopped.
pub(crate) async fn pause(retry: &RetryConfig, attempt: u32, control: &mut watch::Receiver<RunState>) -> bool {
    let deadline = tokio::time::sleep(retry.backoff(attempt));
    tokio::pin!(deadline);
    loop {
        if *control.borrow_and_update() == RunState::Stopped {
            return false;
        }
        tokio::select! {
            _ = &mut deadline => return true,
            changed = control.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Reopen a connection that dropped after start. Retries forever with the
/// same backoff; gives up only when the job stops.
pub(crate) async fn reconnect<T, F, Fut>(
    retry: &RetryConfig,
    label: &str,
    control: &mut watch::Receiver<RunState>,
    mut open: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let mut attempt: u32 = 1;
    loop {
        if !pause(retry, attempt, control).await {
            return None;
        }
        match open().await {
            Ok(endpoint) => return Some(endpoint),
            Err(err) => {
                warn!(connector = label, attempt, error = %err, "reconnect failed");
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig {
            connect_attempts: attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn connect_gives_up_after_the_configured_attempts() {
        let tries = AtomicU32::new(0);
        let tries = &tries;
        let result: Result<(), _> = connect(&fast(3), "c", move || async move {
            tries.fetch_add(1, Ordering::SeqCst);
            Err(ConnectorError::Connect("refused".into()))
        })
        .await;
        assert!(matches!(result, Err(ConnectorError::Connect(_))));
        assert_eq!(tries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn connect_returns_the_first_success() {
        let tries = AtomicU32::new(0);
        let tries = &tries;
        let result = connect(&fast(5), "c", move || async move {
            if tries.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ConnectorError::Connect("refused".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(tries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reconnect_stops_with_the_job() {
        let (tx, mut rx) = watch::channel(RunState::Running);
        tx.send_replace(RunState::Stopped);
        let result: Option<()> = reconnect(&fast(1), "c", &mut rx, || async {
            Err(ConnectorError::Connect("refused".into()))
        })
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn pause_wakes_when_the_job_stops() {
        let slow = RetryConfig {
            connect_attempts: 1,
            initial_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
        };
        let (tx, mut rx) = watch::channel(RunState::Running);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            tx.send_replace(RunState::Stopped);
            tx
        });
        let paused = tokio::time::timeout(std::time::Duration::from_secs(2), pause(&slow, 1, &mut rx)).await;
        assert_eq!(paused.ok(), Some(false));
        stopper.await.unwrap();
    }
}
