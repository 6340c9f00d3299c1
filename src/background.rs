//! Background task supervision.
//!
//! Extensions start long-running work during activation; the supervisor owns
//! those tasks. A task that returns `Ok` is stopped. A task that fails is
//! restarted after a backoff delay, up to a configured cap; past the cap the
//! supervisor emits one exhausted event and abandons the task until the
//! extension is reloaded. The supervisor only counts and schedules restarts.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::host::HostEvent;

/// Restart behavior for supervised tasks.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Restarts allowed before a task is abandoned.
    pub max_restarts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RestartPolicy {
    /// Exponential backoff, doubling per restart, capped at `max_delay`.
    pub fn delay_for(&self, restart_count: u32) -> Duration {
        let exponent = restart_count.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

/// Lifecycle of one supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Started,
    Restarting,
    Stopped,
    Exhausted,
}

struct TaskEntry {
    status: TaskStatus,
    restart_count: u32,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct BackgroundTaskSupervisor {
    policy: RestartPolicy,
    events: broadcast::Sender<HostEvent>,
    tasks: Arc<Mutex<HashMap<(String, String), TaskEntry>>>,
}

impl BackgroundTaskSupervisor {
    pub fn new(policy: RestartPolicy, events: broadcast::Sender<HostEvent>) -> Self {
        Self {
            policy,
            events,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a supervised task. The factory is invoked for the initial run
    /// and once per restart.
    pub fn spawn<F, Fut>(&self, extension_id: &str, task_id: &str, factory: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let key = (extension_id.to_string(), task_id.to_string());
        let extension_id = extension_id.to_string();
        let task_id = task_id.to_string();
        let policy = self.policy.clone();
        let events = self.events.clone();
        let tasks = Arc::clone(&self.tasks);

        let loop_key = key.clone();
        let handle = tokio::spawn(async move {
            let mut restart_count = 0u32;
            loop {
                match factory().await {
                    Ok(()) => {
                        info!(%extension_id, %task_id, "background task stopped");
                        set_status(&tasks, &loop_key, TaskStatus::Stopped, restart_count);
                        return;
                    }
                    Err(err) => {
                        restart_count += 1;
                        if restart_count > policy.max_restarts {
                            error!(
                                %extension_id, %task_id, error = %err,
                                "background task failed, restarts exhausted"
                            );
                            set_status(&tasks, &loop_key, TaskStatus::Exhausted, restart_count);
                            let _ = events.send(HostEvent::BackgroundTaskExhausted {
                                extension_id: extension_id.clone(),
                                task_id: task_id.clone(),
                            });
                            return;
                        }

                        let delay = policy.delay_for(restart_count);
                        warn!(
                            %extension_id, %task_id, error = %err, restart_count,
                            delay_ms = delay.as_millis() as u64,
                            "background task failed, restarting"
                        );
                        set_status(&tasks, &loop_key, TaskStatus::Restarting, restart_count);
                        let _ = events.send(HostEvent::BackgroundTaskRestarting {
                            extension_id: extension_id.clone(),
                            task_id: task_id.clone(),
                            restart_count,
                            delay_ms: delay.as_millis() as u64,
                        });
                        tokio::time::sleep(delay).await;
                        set_status(&tasks, &loop_key, TaskStatus::Started, restart_count);
                    }
                }
            }
        });

        let replaced = self.tasks.lock().unwrap().insert(
            key,
            TaskEntry {
                status: TaskStatus::Started,
                restart_count: 0,
                handle,
            },
        );
        // A respawn under the same key supersedes the old loop.
        if let Some(old) = replaced {
            old.handle.abort();
        }
    }

    /// Current status and restart count, if the task is known.
    pub fn status(&self, extension_id: &str, task_id: &str) -> Option<(TaskStatus, u32)> {
        self.tasks
            .lock()
            .unwrap()
            .get(&(extension_id.to_string(), task_id.to_string()))
            .map(|entry| (entry.status, entry.restart_count))
    }

    /// Abort and forget every task owned by an extension.
    pub fn abort_tasks(&self, extension_id: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|(owner, _), entry| {
            if owner == extension_id {
                entry.handle.abort();
                false
            } else {
                true
            }
        });
    }
}

fn set_status(
    tasks: &Arc<Mutex<HashMap<(String, String), TaskEntry>>>,
    key: &(String, String),
    status: TaskStatus,
    restart_count: u32,
) {
    if let Some(entry) = tasks.lock().unwrap().get_mut(key) {
        entry.status = status;
        entry.restart_count = restart_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            max_restarts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy {
            max_restarts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_successful_task_stops() {
        let (tx, _rx) = broadcast::channel(16);
        let supervisor = BackgroundTaskSupervisor::new(fast_policy(5), tx);

        supervisor.spawn("acme.sync", "poll", || async { Ok(()) });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            supervisor.status("acme.sync", "poll"),
            Some((TaskStatus::Stopped, 0))
        );
    }

    #[tokio::test]
    async fn test_failing_task_restarts_then_exhausts() {
        let (tx, mut rx) = broadcast::channel(64);
        let supervisor = BackgroundTaskSupervisor::new(fast_policy(5), tx);

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        supervisor.spawn("acme.sync", "poll", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("connection refused")
            }
        });

        let mut restarting = 0;
        let mut exhausted = 0;
        for _ in 0..6 {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap()
            {
                HostEvent::BackgroundTaskRestarting { restart_count, .. } => {
                    restarting += 1;
                    assert_eq!(restart_count, restarting);
                }
                HostEvent::BackgroundTaskExhausted { .. } => exhausted += 1,
                other => panic!("unexpected event: {other:?}"),
            }
        }

        assert_eq!(restarting, 5);
        assert_eq!(exhausted, 1);
        // Initial run plus five restarts, then abandoned.
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert_eq!(
            supervisor.status("acme.sync", "poll").map(|(s, _)| s),
            Some(TaskStatus::Exhausted)
        );
    }

    #[tokio::test]
    async fn test_respawn_same_key_aborts_old_loop() {
        let (tx, _rx) = broadcast::channel(16);
        let supervisor = BackgroundTaskSupervisor::new(fast_policy(5), tx);

        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        supervisor.spawn("acme.sync", "poll", move || {
            let counter = Arc::clone(&counter);
            async move {
                loop {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        supervisor.spawn("acme.sync", "poll", || async { Ok(()) });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let after_respawn = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_respawn);
        assert_eq!(
            supervisor.status("acme.sync", "poll"),
            Some((TaskStatus::Stopped, 0))
        );
    }

    #[tokio::test]
    async fn test_abort_tasks_forgets_extension() {
        let (tx, _rx) = broadcast::channel(16);
        let supervisor = BackgroundTaskSupervisor::new(fast_policy(5), tx);

        supervisor.spawn("acme.sync", "poll", || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        assert!(supervisor.status("acme.sync", "poll").is_some());

        supervisor.abort_tasks("acme.sync");
        assert!(supervisor.status("acme.sync", "poll").is_none());
    }
}
