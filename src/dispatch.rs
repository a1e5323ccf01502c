//! Bounded execution of document verifications.
//!
//! Verification is CPU bound, so each document is checked on tokio's
//! blocking pool. A fair semaphore keeps at most `workers` of them running;
//! extra submissions wait their turn in arrival order.

use std::{any::Any, sync::Arc};

use tokio::{sync::Semaphore, task::JoinError};

use crate::{verdict::DocumentVerdict, TrustList};

/// The function run for each submitted document.
pub type Pipeline = Arc<dyn Fn(&[u8], &TrustList) -> DocumentVerdict + Send + Sync>;

pub struct Dispatcher {
    workers: usize,
    permits: Arc<Semaphore>,
    trust_list: Arc<TrustList>,
    pipeline: Pipeline,
}

impl Dispatcher {
    /// Creates a dispatcher running [`crate::verify_document`] on at most
    /// `workers` documents at once.
    pub fn new(workers: usize, trust_list: Arc<TrustList>) -> Self {
        Self::with_pipeline(workers, trust_list, Arc::new(crate::verify_document))
    }

    pub fn with_pipeline(workers: usize, trust_list: Arc<TrustList>, pipeline: Pipeline) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            trust_list,
            pipeline,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Verifies one document, waiting for a free worker first.
    ///
    /// Always produces a verdict: a panic during verification, or a
    /// submission after [`Dispatcher::shutdown`], gives an error verdict.
    pub async fn submit(&self, pdf_bytes: Vec<u8>) -> DocumentVerdict {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                log::warn!("verification refused, the dispatcher is shut down");
                return DocumentVerdict::unexpected(&"verification service is shutting down");
            }
        };

        let trust_list = self.trust_list.clone();
        let pipeline = self.pipeline.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            pipeline(pdf_bytes.as_slice(), trust_list.as_ref())
        });

        match task.await {
            Ok(verdict) => verdict,
            Err(e) => {
                let summary = join_error_summary(e);
                log::error!("verification task failed: {summary}");
                DocumentVerdict::unexpected(&summary)
            }
        }
    }

    /// Waits for queued and running verifications to finish, then refuses
    /// any new submission.
    pub async fn shutdown(&self) {
        log::info!("draining verification workers");
        let all = u32::try_from(self.workers).unwrap_or(u32::MAX);
        // Fair semaphore: everything submitted before this point gets its
        // permit first.
        if let Ok(permits) = self.permits.acquire_many(all).await {
            permits.forget();
        }
        self.permits.close();
        log::info!("verification workers stopped");
    }
}

fn join_error_summary(error: JoinError) -> String {
    if error.is_panic() {
        panic_message(error.into_panic())
    } else {
        error.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "verification panicked".to_owned()
    }
}
