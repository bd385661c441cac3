//! Consumer supervisor.
//!
//! Spawns one task per (topic, group, handler), tracks them by id, and stops
//! them together on shutdown. Startup is all-or-nothing: if any consumer
//! fails to reach `Running`, the ones already started are stopped and the
//! error is returned.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::consumer::{ConsumerState, MessageConsumer};
use crate::error::{BrokerError, SupervisorError};
use crate::handlers::MessageHandler;

/// One consumer to run.
pub struct ConsumerSpec {
    pub topic: String,
    pub group: String,
    pub handler: Arc<dyn MessageHandler>,
}

impl ConsumerSpec {
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            handler,
        }
    }
}

struct ConsumerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), BrokerError>>,
}

pub struct ConsumerSupervisor {
    broker: Arc<dyn Broker>,
    tasks: Mutex<HashMap<String, ConsumerTask>>,
    next_id: AtomicU64,
}

impl ConsumerSupervisor {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Ids of the tasks currently supervised.
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_tasks().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Start every consumer and wait until each one is running.
    pub async fn start_all(&self, specs: Vec<ConsumerSpec>) -> Result<Vec<String>, SupervisorError> {
        let mut pending = Vec::with_capacity(specs.len());

        for spec in specs {
            let consumer = MessageConsumer::new(Arc::clone(&self.broker), spec.topic, spec.group);
            let id = format!(
                "{}/{}#{}",
                consumer.topic(),
                consumer.group(),
                self.next_id.fetch_add(1, Ordering::SeqCst)
            );
            let state = consumer.watch_state();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handler = spec.handler;

            let handle = tokio::spawn(async move { consumer.run(handler, shutdown_rx).await });

            self.lock_tasks().insert(
                id.clone(),
                ConsumerTask {
                    shutdown: shutdown_tx,
                    handle,
                },
            );
            info!(task_id = %id, "consumer_task_spawned");
            pending.push((id, state));
        }

        let mut started = Vec::with_capacity(pending.len());
        for (id, mut state) in pending {
            let running = matches!(
                state
                    .wait_for(|s| *s != ConsumerState::NotStarted)
                    .await
                    .map(|s| *s),
                Ok(ConsumerState::Running | ConsumerState::Dispatching)
            );

            if !running {
                let err = self.reap(&id).await;
                error!(task_id = %id, error = %err, "consumer_start_failed");
                for stop_err in self.stop_all().await {
                    warn!(error = %stop_err, "consumer_stop_failed");
                }
                return Err(err);
            }

            started.push(id);
        }

        info!(count = started.len(), "consumers_started");
        Ok(started)
    }

    /// Signal every task to stop, then wait for each. Errors are collected,
    /// not raised; a slow task does not delay the others' shutdown signal.
    pub async fn stop_all(&self) -> Vec<SupervisorError> {
        let tasks: Vec<(String, ConsumerTask)> = self.lock_tasks().drain().collect();

        for (id, task) in &tasks {
            if task.shutdown.send(true).is_err() {
                info!(task_id = %id, "consumer_already_exited");
            }
        }

        let mut errors = Vec::new();
        for (id, task) in tasks {
            if let Err(e) = join_result(&id, task.handle.await) {
                warn!(task_id = %id, error = %e, "consumer_task_failed");
                errors.push(e);
            } else {
                info!(task_id = %id, "consumer_task_stopped");
            }
        }

        errors
    }

    /// Drive `work` to completion, then stop every consumer whatever it
    /// returned. Stop errors are logged.
    pub async fn run_then_stop<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let output = work.await;

        for e in self.stop_all().await {
            warn!(error = %e, "consumer_shutdown_error");
        }

        output
    }

    /// Remove a task that stopped during startup and explain why.
    async fn reap(&self, id: &str) -> SupervisorError {
        let Some(task) = self.lock_tasks().remove(id) else {
            return SupervisorError::NotStarted { id: id.to_string() };
        };

        match join_result(id, task.handle.await) {
            Err(e) => e,
            Ok(()) => SupervisorError::NotStarted { id: id.to_string() },
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConsumerTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn join_result(
    id: &str,
    result: Result<Result<(), BrokerError>, tokio::task::JoinError>,
) -> Result<(), SupervisorError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(SupervisorError::Consumer {
            id: id.to_string(),
            source,
        }),
        Err(e) => Err(SupervisorError::Panicked {
            id: id.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown_signal_received");
}
