//! One long-lived thread that performs every store call for a service.
//!
//! A caller waits up to its timeout for its own call. A call that outlives
//! the caller keeps the thread busy, and newer calls wait in a single slot
//! where each replaces the one before it. When the store comes back only the
//! newest state is written, and a hung store costs one thread in total.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use hwpolicy_storage::{PolicyStore, StorageError};
use parking_lot::{Condvar, Mutex};

pub(crate) type StoreOp = Box<dyn FnOnce(&dyn PolicyStore) -> Result<(), StorageError> + Send>;

struct Job {
    generation: u64,
    op: StoreOp,
    reply: mpsc::Sender<Result<(), StorageError>>,
}

#[derive(Default)]
struct Slot {
    pending: Option<Job>,
    closed: bool,
}

#[derive(Default)]
struct Mailbox {
    slot: Mutex<Slot>,
    ready: Condvar,
}

pub(crate) struct PersistWorker {
    mailbox: Arc<Mailbox>,
}

impl PersistWorker {
    pub(crate) fn start(store: Arc<dyn PolicyStore>) -> Result<Self, StorageError> {
        let mailbox = Arc::new(Mailbox::default());
        let worker_mailbox = Arc::clone(&mailbox);
        let _detached = thread::Builder::new()
            .name(format!("hwpolicy-persist-{}", store.name()))
            .spawn(move || drain_mailbox(store.as_ref(), &worker_mailbox))?;
        Ok(Self { mailbox })
    }

    /// Hands `op` to the worker and waits at most `timeout` for its result.
    /// A still-pending older call is dropped in favour of this one.
    pub(crate) fn submit(
        &self,
        generation: u64,
        op: StoreOp,
        timeout: Duration,
    ) -> Result<(), StorageError> {
        let (reply, outcome) = mpsc::channel();
        {
            let mut slot = self.mailbox.slot.lock();
            if slot.closed {
                return Err(StorageError::WorkerLost);
            }
            let job = Job {
                generation,
                op,
                reply,
            };
            if let Some(superseded) = slot.pending.replace(job) {
                tracing::debug!(
                    superseded = superseded.generation,
                    generation,
                    "pending persistence replaced by newer state"
                );
            }
        }
        self.mailbox.ready.notify_one();

        match outcome.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(StorageError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(StorageError::WorkerLost),
        }
    }
}

impl Drop for PersistWorker {
    fn drop(&mut self) {
        self.mailbox.slot.lock().closed = true;
        self.mailbox.ready.notify_all();
    }
}

/// Marks the mailbox closed when the worker leaves, even by unwinding, so
/// later callers fail fast instead of waiting out their timeout.
struct CloseOnExit<'a>(&'a Mailbox);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        let mut slot = self.0.slot.lock();
        slot.closed = true;
        slot.pending = None;
    }
}

fn drain_mailbox(store: &dyn PolicyStore, mailbox: &Mailbox) {
    let _close = CloseOnExit(mailbox);
    loop {
        let job = {
            let mut slot = mailbox.slot.lock();
            loop {
                if let Some(job) = slot.pending.take() {
                    break job;
                }
                if slot.closed {
                    return;
                }
                mailbox.ready.wait(&mut slot);
            }
        };
        let result = (job.op)(store);
        if job.reply.send(result).is_err() {
            tracing::debug!(
                store = store.name(),
                generation = job.generation,
                "persistence finished after its caller stopped waiting"
            );
        }
    }
}
