//! Dynamically growing work queue with bounded parallelism
//!
//! Directory synchronizations enqueue further work while the queue is being
//! drained, so the queue cannot know up front when it is finished. Each
//! directory whose synchronize body has not completed holds a
//! [`DirectoryReservation`]; the pending count starts at one for the root.
//! Reservations are taken before the directory's item is enqueued and
//! released after its body has enqueued all of its own work. The release that
//! brings the count to zero closes the queue, so workers drain what is left
//! and stop.

use futures::future::BoxFuture;
use ferrobackup_types::{CancellationToken, Error, Parallelism, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

/// A deferred unit of work
pub type WorkItem = BoxFuture<'static, Result<()>>;

struct Shared {
    sender: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    pending: AtomicUsize,
}

/// Cloneable handle used by work items to enqueue more work
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Enqueue a work item
    ///
    /// Fails once the queue has been closed.
    pub fn submit<F>(&self, item: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let sender = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender
                .send(Box::pin(item))
                .map_err(|_| Error::sync("work queue receiver dropped")),
            None => Err(Error::sync("work queue already closed")),
        }
    }

    /// Count one more directory whose synchronization is outstanding
    pub fn reserve_directory(&self) -> DirectoryReservation {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        DirectoryReservation {
            handle: Some(self.clone()),
        }
    }

    /// Directories still holding a reservation
    pub fn pending_directories(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// True once no more work can be enqueued
    pub fn is_closed(&self) -> bool {
        self.shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn release_directory(&self) {
        let previous = self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            // Only the transition to zero closes; taking the sender makes a
            // second close a no-op.
            let closed = self
                .shared
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if closed.is_some() {
                debug!("All directories synchronized, closing work queue");
            }
        }
    }
}

/// One outstanding directory synchronization
///
/// Dropping the reservation releases it, whether or not its work ran.
pub struct DirectoryReservation {
    handle: Option<SchedulerHandle>,
}

impl DirectoryReservation {
    /// Enqueue the directory's synchronize body
    ///
    /// The reservation is released when `body` completes or is dropped.
    pub fn submit<F>(self, body: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let Some(handle) = self.handle.clone() else {
            return Err(Error::sync("directory reservation already released"));
        };
        handle.submit(async move {
            let _reservation = self;
            body.await
        })
    }
}

impl Drop for DirectoryReservation {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release_directory();
        }
    }
}

/// Owner of the work queue
pub struct Scheduler {
    handle: SchedulerHandle,
    receiver: mpsc::UnboundedReceiver<WorkItem>,
}

impl Scheduler {
    /// Create a scheduler together with the root directory's reservation
    pub fn new() -> (Self, DirectoryReservation) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = SchedulerHandle {
            shared: Arc::new(Shared {
                sender: Mutex::new(Some(sender)),
                pending: AtomicUsize::new(1),
            }),
        };
        let root = DirectoryReservation {
            handle: Some(handle.clone()),
        };
        (Self { handle, receiver }, root)
    }

    /// Handle for enqueuing work
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Execute work items until the queue is closed and drained
    ///
    /// A failed item does not stop the others: every queued item still runs
    /// and all failures are returned in one [`Error::Aggregate`] once the
    /// queue has drained. Cancellation stops dequeuing, awaits the items
    /// already running and is reported as [`Error::Cancelled`].
    pub async fn run(mut self, parallelism: Parallelism, ct: &CancellationToken) -> Result<()> {
        let semaphore = parallelism.limit().map(|limit| Arc::new(Semaphore::new(limit)));
        let mut running: JoinSet<Result<()>> = JoinSet::new();
        let mut errors = Vec::new();

        loop {
            tokio::select! {
                biased;
                () = ct.cancelled() => break,
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    collect(joined, &mut errors);
                }
                next = next_item(&mut self.receiver, semaphore.as_ref()) => match next {
                    Some((item, permit)) => {
                        running.spawn(async move {
                            let result = item.await;
                            drop(permit);
                            result
                        });
                    }
                    None => break,
                },
            }
        }

        while let Some(joined) = running.join_next().await {
            collect(joined, &mut errors);
        }

        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            error!("{} work item(s) failed", errors.len());
            Err(Error::Aggregate { errors })
        }
    }
}

async fn next_item(
    receiver: &mut mpsc::UnboundedReceiver<WorkItem>,
    semaphore: Option<&Arc<Semaphore>>,
) -> Option<(WorkItem, Option<OwnedSemaphorePermit>)> {
    let permit = match semaphore {
        Some(semaphore) => Some(semaphore.clone().acquire_owned().await.ok()?),
        None => None,
    };
    receiver.recv().await.map(|item| (item, permit))
}

fn collect(joined: std::result::Result<Result<()>, JoinError>, errors: &mut Vec<Error>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(error)) => errors.push(error),
        Err(join_error) => errors.push(Error::sync(format!("work item panicked: {}", join_error))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    fn visit(
        handle: SchedulerHandle,
        depth: u32,
        branching: u32,
        visited: Arc<AtomicU64>,
    ) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            visited.fetch_add(1, Ordering::SeqCst);
            if depth == 0 {
                return Ok(());
            }
            for _ in 0..branching {
                // A file action, then a child directory.
                handle.submit(async { Ok(()) })?;
                let child = handle.reserve_directory();
                child.submit(visit(handle.clone(), depth - 1, branching, visited.clone()))?;
            }
            Ok(())
        })
    }

    async fn run_tree(depth: u32, branching: u32, parallelism: Parallelism) -> u64 {
        let (scheduler, root) = Scheduler::new();
        let handle = scheduler.handle();
        let visited = Arc::new(AtomicU64::new(0));
        root.submit(visit(handle.clone(), depth, branching, visited.clone()))
            .unwrap();

        tokio::time::timeout(
            Duration::from_secs(30),
            scheduler.run(parallelism, &CancellationToken::new()),
        )
        .await
        .expect("scheduler deadlocked")
        .unwrap();

        assert!(handle.is_closed());
        assert_eq!(handle.pending_directories(), 0);
        visited.load(Ordering::SeqCst)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tree_completes_without_deadlock() {
        // 1 + 5 + 25 + 125 + 625 + 3125 directories
        assert_eq!(run_tree(5, 5, Parallelism::UNBOUNDED).await, 3906);
        assert_eq!(run_tree(3, 4, Parallelism::new(2).unwrap()).await, 85);
        assert_eq!(run_tree(0, 5, Parallelism::new(1).unwrap()).await, 1);
    }

    #[tokio::test]
    async fn test_close_happens_once() {
        let (scheduler, root) = Scheduler::new();
        let handle = scheduler.handle();
        let child = handle.reserve_directory();
        drop(root);
        assert!(!handle.is_closed());
        drop(child);
        assert!(handle.is_closed());
        assert!(handle.submit(async { Ok(()) }).is_err());
        scheduler
            .run(Parallelism::UNBOUNDED, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failures_are_aggregated() {
        let (scheduler, root) = Scheduler::new();
        let handle = scheduler.handle();
        let executed = Arc::new(AtomicU64::new(0));
        {
            let executed = executed.clone();
            root.submit(async move {
                handle.submit(async { Err(Error::storage("first")) })?;
                for _ in 0..3 {
                    let executed = executed.clone();
                    handle.submit(async move {
                        executed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })?;
                }
                handle.submit(async { Err(Error::storage("second")) })?;
                Ok(())
            })
            .unwrap();
        }

        let result = scheduler
            .run(Parallelism::new(1).unwrap(), &CancellationToken::new())
            .await;
        match result {
            Err(Error::Aggregate { errors }) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].to_string().contains("first"));
                assert!(errors[1].to_string().contains("second"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // Items queued behind the failure still ran.
        assert_eq!(executed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_directory_does_not_stop_siblings() {
        let (scheduler, root) = Scheduler::new();
        let handle = scheduler.handle();
        let visited = Arc::new(AtomicU64::new(0));
        {
            let visited = visited.clone();
            root.submit(async move {
                let failing = handle.reserve_directory();
                failing.submit(async { Err(Error::storage("listing failed")) })?;
                for _ in 0..4 {
                    let sibling = handle.reserve_directory();
                    sibling.submit(visit(handle.clone(), 1, 2, visited.clone()))?;
                }
                Ok(())
            })
            .unwrap();
        }

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(Parallelism::new(1).unwrap(), &CancellationToken::new()),
        )
        .await
        .expect("scheduler deadlocked");
        assert!(matches!(result, Err(Error::Aggregate { ref errors }) if errors.len() == 1));
        // Four siblings, each with two children.
        assert_eq!(visited.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dequeuing() {
        let (scheduler, root) = Scheduler::new();
        let ct = CancellationToken::new();
        let executed = Arc::new(AtomicU64::new(0));
        let handle = scheduler.handle();
        {
            let ct = ct.clone();
            let executed = executed.clone();
            root.submit(async move {
                ct.cancel();
                for _ in 0..10 {
                    let executed = executed.clone();
                    handle.submit(async move {
                        executed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })?;
                }
                Ok(())
            })
            .unwrap();
        }

        let result = scheduler.run(Parallelism::new(1).unwrap(), &ct).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_reservation_releases() {
        let (scheduler, root) = Scheduler::new();
        let handle = scheduler.handle();
        root.submit(async move {
            // A directory whose creation failed never submits its body.
            let orphan = handle.reserve_directory();
            drop(orphan);
            Ok(())
        })
        .unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(Parallelism::UNBOUNDED, &CancellationToken::new()),
        )
        .await
        .expect("scheduler deadlocked")
        .unwrap();
    }
}
