//! Deadline timer shared by every file's uploader.
//!
//! One thread sleeps until the earliest pending deadline and then notifies the
//! owning [`FileUploader`]. Entries carry the uploader's generation at the time
//! they were pushed; the uploader discards firings whose generation is stale.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace};

use super::FileUploader;

struct Entry {
    deadline: Instant,
    /// Insertion order, breaks ties between equal deadlines.
    seq: u64,
    generation: u64,
    uploader: Arc<FileUploader>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// Single-threaded deadline scheduler for deferred uploads.
pub struct UploadScheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl UploadScheduler {
    /// Start the timer thread.
    pub fn start() -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("seccloud-upload-timer".to_string())
            .spawn(move || timer_loop(&worker))?;
        debug!("Upload scheduler started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Fire `uploader.on_deadline(generation)` at `deadline`.
    ///
    /// Returns `false` once the scheduler has been shut down.
    pub fn schedule(&self, deadline: Instant, generation: u64, uploader: Arc<FileUploader>) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let earliest = state.heap.peek().is_none_or(|top| deadline < top.deadline);
        state.heap.push(Entry {
            deadline,
            seq,
            generation,
            uploader,
        });
        drop(state);

        if earliest {
            self.shared.wakeup.notify_one();
        }
        true
    }

    /// Entries waiting to fire, including stale ones.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Stop the timer thread. Pending entries are dropped without firing.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            let dropped = state.heap.len();
            state.heap.clear();
            dropped
        };
        self.shared.wakeup.notify_all();

        if let Some(handle) = self.thread.lock().take()
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            error!("Upload timer thread panicked");
        }
        info!(dropped, "Upload scheduler stopped");
    }
}

impl Drop for UploadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for UploadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadScheduler")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

fn timer_loop(shared: &Shared) {
    loop {
        let due = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                let now = Instant::now();
                match state.heap.peek().map(|top| top.deadline) {
                    None => shared.wakeup.wait(&mut state),
                    Some(deadline) if deadline <= now => break state.heap.pop(),
                    Some(deadline) => {
                        shared.wakeup.wait_until(&mut state, deadline);
                    }
                }
            }
        };

        // The uploader may schedule again; never call it with the heap locked.
        if let Some(entry) = due {
            trace!(generation = entry.generation, "Upload deadline fired");
            entry.uploader.on_deadline(entry.generation);
        }
    }
}
