//! Work queue between ingestion and the orchestrator
//!
//! Producers (connectors, the `--posts-file` loader) submit validated posts;
//! the orchestrator drains a bounded batch per cycle.

use tokio::sync::mpsc;
use tracing::debug;

use dsw_common::models::{IngestRequest, Post};
use dsw_common::{Error, Result};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000;

/// Submitting half, cheap to clone
#[derive(Clone)]
pub struct PostSubmitter {
    tx: mpsc::Sender<Post>,
}

impl PostSubmitter {
    /// Validate and enqueue a raw request; waits when the queue is full
    pub async fn submit(&self, request: IngestRequest) -> Result<Post> {
        let post = request.into_post()?;
        self.submit_post(post.clone()).await?;
        Ok(post)
    }

    pub async fn submit_post(&self, post: Post) -> Result<()> {
        debug!(post_id = %post.id, source = %post.source, "Post queued");
        self.tx
            .send(post)
            .await
            .map_err(|_| Error::Internal("post queue closed".to_string()))
    }
}

/// Receiving half, owned by the orchestrator
pub struct PostQueue {
    rx: mpsc::Receiver<Post>,
}

impl PostQueue {
    pub fn new(capacity: usize) -> (PostSubmitter, PostQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (PostSubmitter { tx }, PostQueue { rx })
    }

    /// Take up to `max` posts without waiting
    pub fn drain(&mut self, max: usize) -> Vec<Post> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(post) => batch.push(post),
                Err(_) => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
