//! Async image-task poller
//!
//! Submitted jobs are observed by polling on a fixed interval up to a hard
//! iteration cap. Every tick yields the current task snapshot before the
//! next sleep, so callers can relay progress as it arrives.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::Stream;

use crate::error::{PolychatError, Result};
use crate::providers::{ImagineTask, ProviderClient, ProviderKind};

/// Where task snapshots come from; a seam for tests
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn fetch(&self, task_id: &str) -> Result<ImagineTask>;
}

/// [`TaskSource`] backed by a provider adapter
pub struct ProviderTaskSource {
    pub client: ProviderClient,
    pub kind: ProviderKind,
}

#[async_trait]
impl TaskSource for ProviderTaskSource {
    async fn fetch(&self, task_id: &str) -> Result<ImagineTask> {
        self.client.poll_task(self.kind, task_id).await
    }
}

/// Poll loop knobs
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_polls: 120,
        }
    }
}

/// Poll a task until success, failure or the iteration budget runs out
///
/// Terminal outcomes: progress 100 (success), an explicit failure reason
/// (aborts immediately), or `max_polls` exhausted, which ends the stream
/// with a [`PolychatError::TaskTimeout`].
pub fn poll_task_stream<S>(
    source: S,
    task_id: String,
    opts: PollOptions,
) -> impl Stream<Item = Result<ImagineTask>> + Send
where
    S: TaskSource + 'static,
{
    try_stream! {
        for _ in 0..opts.max_polls {
            let task = source.fetch(&task_id).await?;
            let terminal = task.is_done() || task.is_failed();
            if task.is_failed() {
                tracing::warn!(task_id = %task_id, reason = ?task.fail_reason, "imagine task failed");
            }
            yield task;
            if terminal {
                return;
            }
            tokio::time::sleep(opts.interval).await;
        }

        Err(PolychatError::TaskTimeout {
            task_id,
            polls: opts.max_polls,
        })?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct ScriptedSource {
        calls: Arc<AtomicU32>,
        /// Poll count at which the task completes; None never completes
        done_at: Option<u32>,
        fail_at: Option<u32>,
    }

    #[async_trait]
    impl TaskSource for ScriptedSource {
        async fn fetch(&self, task_id: &str) -> Result<ImagineTask> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_at.is_some_and(|at| n >= at) {
                return Ok(ImagineTask {
                    task_id: task_id.to_string(),
                    progress: 30,
                    image_url: None,
                    fail_reason: Some("banned prompt".to_string()),
                });
            }
            if self.done_at.is_some_and(|at| n >= at) {
                return Ok(ImagineTask {
                    task_id: task_id.to_string(),
                    progress: 100,
                    image_url: Some("https://cdn.example/img.png".to_string()),
                    fail_reason: None,
                });
            }
            Ok(ImagineTask {
                task_id: task_id.to_string(),
                progress: u8::try_from((n * 10).min(90)).unwrap(),
                image_url: None,
                fail_reason: None,
            })
        }
    }

    fn opts(max_polls: u32) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(1),
            max_polls,
        }
    }

    #[tokio::test]
    async fn test_progress_ticks_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let source = ScriptedSource {
            calls: calls.clone(),
            done_at: Some(3),
            fail_at: None,
        };

        let items: Vec<_> = poll_task_stream(source, "t1".to_string(), opts(10))
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        let last = items.last().unwrap().as_ref().unwrap();
        assert!(last.is_done());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_completing_task_times_out_after_exact_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let source = ScriptedSource {
            calls: calls.clone(),
            done_at: None,
            fail_at: None,
        };

        let items: Vec<_> = poll_task_stream(source, "t2".to_string(), opts(5))
            .collect()
            .await;

        // 5 progress snapshots then the timeout error
        assert_eq!(items.len(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match items.last().unwrap() {
            Err(PolychatError::TaskTimeout { polls, .. }) => assert_eq!(*polls, 5),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_aborts_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let source = ScriptedSource {
            calls: calls.clone(),
            done_at: None,
            fail_at: Some(2),
        };

        let items: Vec<_> = poll_task_stream(source, "t3".to_string(), opts(10))
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        let last = items.last().unwrap().as_ref().unwrap();
        assert!(last.is_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
