//! Supervised background work.
//!
//! Asynchronous work (running an activity, processing a transition,
//! compensating) is a [`Task`] pushed onto a bounded queue and picked up by
//! a fixed set of workers. Workers never submit to the queue they drain: a
//! [`TaskRunner`] continues whatever a task leads to on the same worker, so
//! a full queue only ever holds back outside callers. Each task runs in its
//! own tokio task so a panic is caught, and every failure is reported to
//! the [`TaskRunner`] instead of being dropped.

use async_trait::async_trait;
use orchcore::{ExecutionId, FlowError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    RunActivity {
        execution_id: ExecutionId,
        activity_id: String,
    },
    ProcessTransition {
        execution_id: ExecutionId,
    },
    Rollback {
        execution_id: ExecutionId,
        activity_ids: Vec<String>,
    },
}

impl Task {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            Task::RunActivity { execution_id, .. }
            | Task::ProcessTransition { execution_id }
            | Task::Rollback { execution_id, .. } => *execution_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Task::RunActivity { .. } => "run_activity",
            Task::ProcessTransition { .. } => "process_transition",
            Task::Rollback { .. } => "rollback",
        }
    }
}

/// Executes tasks and is the sink for their failures
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: Task) -> Result<(), FlowError>;

    /// Called with the error of a task that failed or panicked.
    async fn task_failed(&self, task: &Task, error: FlowError);
}

/// Cloneable submission side of the queue
#[derive(Clone)]
pub struct TaskSender {
    sender: mpsc::Sender<Task>,
    shutdown: CancellationToken,
}

impl TaskSender {
    pub async fn submit(&self, task: Task) -> Result<(), FlowError> {
        if self.shutdown.is_cancelled() {
            return Err(FlowError::Shutdown);
        }
        tracing::debug!(execution_id = %task.execution_id(), kind = task.kind(), "Submitting task");
        self.sender.send(task).await.map_err(|_| FlowError::Shutdown)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Submit `task` once `delay` has passed, unless the pool shuts down first.
    pub fn submit_after(&self, task: Task, delay: Duration) {
        let sender = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = sender.submit(task).await {
                        tracing::warn!("Dropping delayed task: {}", e);
                    }
                }
                _ = sender.shutdown.cancelled() => {}
            }
        });
    }
}

pub struct WorkerPool {
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create the queue. Nothing runs until [`WorkerPool::start`].
    pub fn channel(capacity: usize, shutdown: CancellationToken) -> (TaskSender, mpsc::Receiver<Task>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (TaskSender { sender, shutdown }, receiver)
    }

    /// Spawn `worker_count` workers draining `receiver`. Must be called from
    /// within a tokio runtime.
    pub fn start(
        receiver: mpsc::Receiver<Task>,
        runner: Arc<dyn TaskRunner>,
        worker_count: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let runner = runner.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker, "Worker started");
                    loop {
                        let next = {
                            let mut receiver = receiver.lock().await;
                            tokio::select! {
                                _ = shutdown.cancelled() => None,
                                task = receiver.recv() => task,
                            }
                        };
                        let Some(task) = next else { break };
                        supervise(runner.clone(), task).await;
                    }
                    tracing::debug!(worker, "Worker stopped");
                })
            })
            .collect();

        Self {
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    /// Stop taking new tasks and wait for the workers to finish the task
    /// they are on.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::error!("Worker terminated abnormally: {}", e);
            }
        }
    }
}

async fn supervise(runner: Arc<dyn TaskRunner>, task: Task) {
    let job = {
        let runner = runner.clone();
        let task = task.clone();
        tokio::spawn(async move { runner.run(task).await })
    };

    let error = match job.await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(join_error) => FlowError::TaskAborted(join_error.to_string()),
    };
    runner.task_failed(&task, error).await;
}
