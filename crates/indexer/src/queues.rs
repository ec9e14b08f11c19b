//! Ingress queues between the host chain's signal thread and the consumer.
//!
//! Four FIFOs share one mutex and one adaptive sleep counter. Producers are
//! synchronous (they run on the host's signal thread); the consumer parks on
//! a [`Notify`], whose stored permit makes the sync-side wakeup race-free.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::warn;

use eosearch_core::types::{BlockState, TransactionMetadata, TransactionTrace};

/// The soft warning threshold for the adaptive sleep, in milliseconds.
const SLEEP_WARN_MS: u64 = 1000;
/// Sleep adjustment step, in milliseconds.
const SLEEP_STEP_MS: u64 = 10;

#[derive(Default)]
struct Queues {
    transactions: VecDeque<Arc<TransactionMetadata>>,
    traces: VecDeque<Arc<TransactionTrace>>,
    blocks: VecDeque<Arc<BlockState>>,
    irreversible: VecDeque<Arc<BlockState>>,
    /// Shared across all four queues; grows while any queue is oversize.
    sleep_ms: u64,
}

/// Everything captured by one consumer swap.
#[derive(Default)]
pub struct DrainedBatch {
    pub traces: VecDeque<Arc<TransactionTrace>>,
    pub transactions: VecDeque<Arc<TransactionMetadata>>,
    pub blocks: VecDeque<Arc<BlockState>>,
    pub irreversible: VecDeque<Arc<BlockState>>,
}

impl DrainedBatch {
    pub fn total(&self) -> usize {
        self.traces.len() + self.transactions.len() + self.blocks.len() + self.irreversible.len()
    }
}

/// The four bounded FIFOs with their shared backpressure state.
pub struct IngressQueues {
    inner: Mutex<Queues>,
    notify: Notify,
    done: AtomicBool,
    max_queue_size: usize,
}

impl IngressQueues {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            inner: Mutex::new(Queues::default()),
            notify: Notify::new(),
            done: AtomicBool::new(false),
            max_queue_size,
        }
    }

    pub fn push_transaction(&self, item: Arc<TransactionMetadata>) {
        self.enqueue(item, |q| &mut q.transactions);
    }

    pub fn push_trace(&self, item: Arc<TransactionTrace>) {
        self.enqueue(item, |q| &mut q.traces);
    }

    pub fn push_block(&self, item: Arc<BlockState>) {
        self.enqueue(item, |q| &mut q.blocks);
    }

    pub fn push_irreversible(&self, item: Arc<BlockState>) {
        self.enqueue(item, |q| &mut q.irreversible);
    }

    /// Append to one queue with cooperative throttling.
    ///
    /// When the target queue is oversize the producer wakes the consumer,
    /// sleeps for the current adaptive interval (raised by one step each
    /// oversize observation) and then appends anyway; the bound is soft.
    /// In-bounds appends lower the interval back toward zero.
    fn enqueue<T, F>(&self, item: T, pick: F)
    where
        F: Fn(&mut Queues) -> &mut VecDeque<T>,
    {
        let mut inner = self.lock();
        if pick(&mut inner).len() > self.max_queue_size {
            inner.sleep_ms += SLEEP_STEP_MS;
            let sleep_ms = inner.sleep_ms;
            let queue_size = pick(&mut inner).len();
            drop(inner);
            self.notify.notify_one();
            if sleep_ms > SLEEP_WARN_MS {
                warn!(queue_size, sleep_ms, "ingress queue backed up");
            }
            std::thread::sleep(Duration::from_millis(sleep_ms));
            inner = self.lock();
        } else {
            inner.sleep_ms = inner.sleep_ms.saturating_sub(SLEEP_STEP_MS);
        }
        pick(&mut inner).push_back(item);
        drop(inner);
        self.notify.notify_one();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.inner.lock().expect("ingress queue mutex poisoned")
    }

    /// Mark the stream finished; the consumer drains and exits.
    pub fn set_done(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn has_work(&self) -> bool {
        let inner = self.lock();
        !(inner.transactions.is_empty()
            && inner.traces.is_empty()
            && inner.blocks.is_empty()
            && inner.irreversible.is_empty())
    }

    /// Park until any queue is non-empty or the stream is done.
    pub async fn wait_for_work(&self) {
        loop {
            let notified = self.notify.notified();
            if self.has_work() || self.is_done() {
                return;
            }
            notified.await;
        }
    }

    /// Atomically move every queue into a local batch.
    pub fn drain(&self) -> DrainedBatch {
        let mut inner = self.lock();
        DrainedBatch {
            traces: std::mem::take(&mut inner.traces),
            transactions: std::mem::take(&mut inner.transactions),
            blocks: std::mem::take(&mut inner.blocks),
            irreversible: std::mem::take(&mut inner.irreversible),
        }
    }

    /// Current adaptive sleep interval in milliseconds.
    pub fn sleep_ms(&self) -> u64 {
        self.lock().sleep_ms
    }
}
