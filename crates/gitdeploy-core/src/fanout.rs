//! Bounded per-host fan-out.
//!
//! Every host gets its own task; a semaphore caps how many run at once.
//! Results come back in the order the hosts were given, one per host,
//! whatever happened to the others. Host tasks run inside the caller's span.

use std::future::Future;
use std::sync::Arc;

use gitdeploy_state::Host;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{warn, Instrument};

/// Result of one host's share of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostOutcome<T> {
    pub host: Host,
    pub result: Result<T, String>,
}

impl<T> HostOutcome<T> {
    pub fn ok(host: Host, detail: T) -> Self {
        Self {
            host,
            result: Ok(detail),
        }
    }

    pub fn failed(host: Host, message: impl Into<String>) -> Self {
        Self {
            host,
            result: Err(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `task` once per host with at most `limit` in flight.
///
/// A panicking task is reported as that host's failure.
pub async fn fan_out<T, F, Fut>(hosts: &[Host], limit: usize, task: F) -> Vec<HostOutcome<T>>
where
    T: Send + 'static,
    F: Fn(Host) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
{
    let task = Arc::new(task);
    let sem = Arc::new(Semaphore::new(limit.max(1)));

    let mut handles = Vec::with_capacity(hosts.len());
    for host in hosts {
        let task = Arc::clone(&task);
        let sem = Arc::clone(&sem);
        let for_task = host.clone();
        let handle = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await.ok();
                task(for_task).await
            }
            .instrument(tracing::Span::current()),
        );
        handles.push((host.clone(), handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (host, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(host = %host, error = %e, "host task did not complete");
                Err(format!("task join error: {e}"))
            }
        };
        outcomes.push(HostOutcome { host, result });
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn hosts(names: &[&str]) -> Vec<Host> {
        names.iter().map(|n| Host::from(*n)).collect()
    }

    #[tokio::test]
    async fn results_follow_host_order_not_completion_order() {
        let fleet = hosts(&["slow", "fast", "medium"]);
        let outcomes = fan_out(&fleet, 3, |host| async move {
            let delay = match host.as_str() {
                "slow" => 30,
                "medium" => 15,
                _ => 0,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, String>(host.to_string())
        })
        .await;
        let order: Vec<&str> = outcomes.iter().map(|o| o.host.as_str()).collect();
        assert_eq!(order, vec!["slow", "fast", "medium"]);
        assert!(outcomes.iter().all(|o| o.result.as_deref() == Ok(o.host.as_str())));
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_others() {
        let fleet = hosts(&["h1", "h2", "h3"]);
        let outcomes = fan_out(&fleet, 2, |host| async move {
            if host.as_str() == "h2" {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        })
        .await;
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1].result, Err("boom".to_string()));
        assert!(outcomes[2].is_ok());
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let fleet = hosts(&["a", "b", "c", "d", "e", "f"]);

        let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));
        fan_out(&fleet, 2, move |_host| {
            let in_flight = Arc::clone(&in_flight_c);
            let peak = Arc::clone(&peak_c);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn panicking_host_is_reported_as_failure() {
        let fleet = hosts(&["ok", "bad"]);
        let outcomes = fan_out(&fleet, 2, |host| async move {
            if host.as_str() == "bad" {
                panic!("host task exploded");
            }
            Ok::<_, String>(())
        })
        .await;
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].result.as_ref().unwrap_err().contains("join error"));
    }
}
