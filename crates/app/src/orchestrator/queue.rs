use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::{FileOutcome, FileTask, Orchestrator};
use crate::error::PipelineError;

const QUEUE_DEPTH: usize = 64;

struct Job {
    task: FileTask,
    reply: oneshot::Sender<FileOutcome>,
}

/// Feeds file tasks to at most `workers` concurrent pipeline runs.
///
/// Each submitted task gets its own result channel. Cancelling the queue
/// drops tasks that have not started; their receivers see a closed channel.
pub struct WorkQueue {
    sender: mpsc::Sender<Job>,
    dispatcher: JoinHandle<()>,
    cancel: CancellationToken,
}

impl WorkQueue {
    pub fn start(orchestrator: Orchestrator, workers: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(QUEUE_DEPTH);
        let cancel = orchestrator.cancellation_token().child_token();
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let token = cancel.clone();
        let dispatcher = tokio::spawn(async move {
            let mut running = JoinSet::new();
            loop {
                let job = tokio::select! {
                    _ = token.cancelled() => break,
                    job = receiver.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                let permit = tokio::select! {
                    _ = token.cancelled() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let orchestrator = orchestrator.clone();
                running.spawn(async move {
                    let outcome = orchestrator.process_file(job.task).await;
                    // The submitter may have stopped listening.
                    let _ = job.reply.send(outcome);
                    drop(permit);
                });
            }
            while running.join_next().await.is_some() {}
        });
        Self {
            sender,
            dispatcher,
            cancel,
        }
    }

    pub async fn submit(
        &self,
        task: FileTask,
    ) -> Result<oneshot::Receiver<FileOutcome>, PipelineError> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(Job { task, reply })
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        Ok(receiver)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop accepting tasks and wait for the running ones to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(err) = self.dispatcher.await {
            tracing::warn!(error = %err, "work queue dispatcher stopped abnormally");
        }
    }
}
