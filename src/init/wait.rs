// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::error;

pub type TaskSet = JoinSet<Result<(), BoxError>>;

/// Waits for the first task in the set to finish. A panicked or aborted task
/// counts as an error.
pub async fn wait_for_any_task(tasks: &mut TaskSet) -> Result<(), BoxError> {
    match tasks.join_next().await {
        // an empty set never completes a task, so wait forever
        None => std::future::pending().await,
        Some(res) => res?,
    }
}

pub async fn wait_for_tasks_with_timeout(
    tasks: &mut TaskSet,
    stage: &'static str,
    timeout: Duration,
) -> Result<(), BoxError> {
    wait_for_tasks_with_deadline(tasks, stage, Instant::now() + timeout).await
}

/// Waits for every task in the set, returning the last task error seen.
pub async fn wait_for_tasks_with_deadline(
    tasks: &mut TaskSet,
    stage: &'static str,
    stop_at: Instant,
) -> Result<(), BoxError> {
    let mut result = Ok(());
    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                return Err(format!("timed out waiting for {} to complete", stage).into());
            }
            Ok(None) => break,
            Ok(Some(Ok(Ok(())))) => {}
            Ok(Some(Ok(Err(e)))) => result = Err(e),
            Ok(Some(Err(e))) => {
                error!(stage, error = %e, "Failed to join with task.");
                result = Err(e.into());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn any_task_reports_first_result() {
        let mut set = TaskSet::new();
        set.spawn(async { Err::<(), BoxError>("boom".into()) });
        set.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let err = wait_for_any_task(&mut set).await.unwrap_err();
        assert_eq!("boom", err.to_string());
    }

    #[tokio::test]
    async fn deadline_wait_collects_errors() {
        let mut set = TaskSet::new();
        set.spawn(async { Ok(()) });
        set.spawn(async { Err::<(), BoxError>("failed".into()) });

        let res = wait_for_tasks_with_timeout(&mut set, "tasks", Duration::from_secs(1)).await;
        assert_eq!("failed", res.unwrap_err().to_string());
        assert!(set.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_wait_times_out() {
        let mut set = TaskSet::new();
        set.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let res = wait_for_tasks_with_timeout(&mut set, "exporter", Duration::from_secs(1)).await;
        assert!(res.unwrap_err().to_string().contains("exporter"));
    }
}
