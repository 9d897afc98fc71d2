//! Waiting on long-running provider operations
//!
//! Polls with exponential backoff until the operation is done, bounded by the
//! per-operation timeout and the reconcile deadline, whichever comes first.
//! Transport errors on an individual poll are retried a bounded number of
//! times, never past that same deadline, before they surface.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use crate::config::WaitConfig;
use crate::provider::{GcpApi, OperationHandle};
use crate::retry::retry_with_backoff;
use crate::scope::ReconcileScope;
use crate::{Error, Result};

/// Polls operation handles to completion
pub struct OperationWaiter<'a> {
    api: &'a dyn GcpApi,
    config: &'a WaitConfig,
}

impl<'a> OperationWaiter<'a> {
    /// Create a waiter polling through `api`
    pub fn new(api: &'a dyn GcpApi, config: &'a WaitConfig) -> Self {
        Self { api, config }
    }

    /// Block until `handle` is done, then report how it finished
    pub async fn wait(&self, scope: &ReconcileScope, handle: OperationHandle) -> Result<()> {
        self.poll(scope, handle)
            .instrument(scope.span().clone())
            .await
    }

    async fn poll(&self, scope: &ReconcileScope, mut handle: OperationHandle) -> Result<()> {
        let started = Instant::now();
        let deadline = (started + self.config.timeout).min(scope.deadline());
        let mut interval = self.config.initial_interval;
        let mut polls = 0u32;

        loop {
            if handle.done {
                debug!(operation = %handle.name, polls, "operation finished");
                return finished(&handle);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    operation = %handle.name,
                    polls,
                    reconcile_deadline = scope.is_expired(),
                    "gave up waiting for operation"
                );
                return Err(Error::timeout(handle.name.as_str(), started.elapsed()));
            }

            tokio::time::sleep(interval.min(deadline - now)).await;
            interval = next_interval(interval, self.config);
            polls += 1;

            let current = handle;
            handle = retry_with_backoff(&self.config.poll_retry, "GetOperation", deadline, || {
                self.api.get_operation(&current)
            })
            .await?;
        }
    }
}

fn next_interval(interval: Duration, config: &WaitConfig) -> Duration {
    let next = interval.as_secs_f64() * config.multiplier;
    Duration::from_secs_f64(next.min(config.max_interval.as_secs_f64()))
}

fn finished(handle: &OperationHandle) -> Result<()> {
    match &handle.error {
        None => Ok(()),
        Some(status) => {
            let message = format!(
                "operation {} failed with code {}: {}",
                handle.name, status.code, status.message
            );
            if status.is_transient() {
                Err(Error::provider_transient("Operation", message))
            } else {
                Err(Error::provider_permanent("Operation", message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ResourceKind;
    use crate::provider::{MockGcpApi, OperationService, OperationStatus};
    use crate::retry::RetryConfig;
    use crate::scope::ResourceKey;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn scope(timeout: Duration) -> ReconcileScope {
        ReconcileScope::new(
            ResourceKind::Project,
            &ResourceKey::new("team-a", "proj"),
            timeout,
        )
    }

    fn pending(name: &str) -> OperationHandle {
        OperationHandle {
            name: name.to_string(),
            service: OperationService::ResourceManager,
            done: false,
            error: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_handles_need_no_polling() {
        let api = MockGcpApi::new();
        let config = WaitConfig::default();
        let waiter = OperationWaiter::new(&api, &config);

        let handle = OperationHandle::completed("projects/p", OperationService::ResourceManager);
        waiter
            .wait(&scope(Duration::from_secs(60)), handle)
            .await
            .unwrap();
    }

    /// Story: an operation that finishes on the third poll is waited out
    #[tokio::test(start_paused = true)]
    async fn story_polls_until_done() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();

        let mut api = MockGcpApi::new();
        api.expect_get_operation().times(3).returning(move |h| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let mut next = h.clone();
            next.done = n >= 2;
            Ok(next)
        });

        let config = WaitConfig::default();
        let waiter = OperationWaiter::new(&api, &config);
        waiter
            .wait(&scope(Duration::from_secs(600)), pending("operations/cp.1"))
            .await
            .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn operation_errors_are_classified_by_code() {
        let mut api = MockGcpApi::new();
        api.expect_get_operation().returning(|h| {
            let mut next = h.clone();
            next.done = true;
            next.error = Some(OperationStatus {
                code: 7,
                message: "caller lacks permission".to_string(),
            });
            Ok(next)
        });

        let config = WaitConfig::default();
        let waiter = OperationWaiter::new(&api, &config);
        let err = waiter
            .wait(&scope(Duration::from_secs(600)), pending("operations/cp.2"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("caller lacks permission"));

        let handle = OperationHandle {
            error: Some(OperationStatus {
                code: 14,
                message: "unavailable".to_string(),
            }),
            ..OperationHandle::completed("operations/cp.3", OperationService::ServiceUsage)
        };
        assert!(waiter
            .wait(&scope(Duration::from_secs(600)), handle)
            .await
            .unwrap_err()
            .is_retryable());
    }

    /// Story: an operation that never finishes times out instead of blocking forever
    #[tokio::test(start_paused = true)]
    async fn story_never_finishing_operation_times_out() {
        let mut api = MockGcpApi::new();
        api.expect_get_operation().returning(|h| Ok(h.clone()));

        let config = WaitConfig {
            timeout: Duration::from_secs(30),
            ..WaitConfig::default()
        };
        let waiter = OperationWaiter::new(&api, &config);
        let err = waiter
            .wait(&scope(Duration::from_secs(600)), pending("operations/cp.4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_deadline_bounds_the_wait() {
        let mut api = MockGcpApi::new();
        api.expect_get_operation().returning(|h| Ok(h.clone()));

        let config = WaitConfig::default();
        let waiter = OperationWaiter::new(&api, &config);
        let started = Instant::now();
        let err = waiter
            .wait(&scope(Duration::from_secs(5)), pending("operations/cp.5"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_transport_errors_are_bounded() {
        let mut api = MockGcpApi::new();
        api.expect_get_operation()
            .times(3)
            .returning(|_| Err(Error::provider_transient("GetOperation", "connection reset")));

        let config = WaitConfig::default();
        let waiter = OperationWaiter::new(&api, &config);
        let err = waiter
            .wait(&scope(Duration::from_secs(600)), pending("operations/cp.6"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_retries_stop_at_the_reconcile_deadline() {
        let mut api = MockGcpApi::new();
        api.expect_get_operation()
            .returning(|_| Err(Error::provider_transient("GetOperation", "connection reset")));

        let config = WaitConfig {
            poll_retry: RetryConfig {
                max_attempts: 10,
                initial_delay: Duration::from_secs(4),
                max_delay: Duration::from_secs(60),
                backoff_multiplier: 2.0,
            },
            ..WaitConfig::default()
        };
        let waiter = OperationWaiter::new(&api, &config);
        let started = Instant::now();
        let err = waiter
            .wait(&scope(Duration::from_secs(5)), pending("operations/cp.7"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection reset"));
        assert!(started.elapsed() <= Duration::from_secs(5));
    }

    #[test]
    fn interval_grows_to_the_cap() {
        let config = WaitConfig::default();
        let mut interval = config.initial_interval;
        for _ in 0..20 {
            interval = next_interval(interval, &config);
        }
        assert_eq!(interval, config.max_interval);
        assert_eq!(
            next_interval(Duration::from_secs(2), &config),
            Duration::from_secs(3)
        );
    }
}
