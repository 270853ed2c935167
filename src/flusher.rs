//! Coalescing arena flusher.
//!
//! Graph writes mark the arena dirty; a worker thread ticks at a fixed
//! interval and performs at most one flush per tick. Rapid write bursts
//! therefore collapse into a single buffer copy + header flip. After
//! each flip the control block generation is bumped so reader processes
//! pick up the new image.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, warn};

use crate::arena::Arena;
use crate::control::ControlBlock;
use crate::error::Result;

/// Default coalescing tick.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

struct FlushTarget {
    arena: Arena,
    master_db: PathBuf,
}

struct Shared {
    dirty: AtomicBool,
    target: Mutex<FlushTarget>,
    control: Option<ControlBlock>,
}

impl Shared {
    fn flush(&self) -> Result<u64> {
        let mut target = self.target.lock().expect("flusher lock poisoned");
        let master_db = target.master_db.clone();
        let sequence = target.arena.flush(&master_db)?;
        drop(target);
        if let Some(control) = &self.control {
            let generation = control.bump_generation();
            debug!(sequence, generation, "arena flushed");
        } else {
            debug!(sequence, "arena flushed");
        }
        Ok(sequence)
    }
}

/// Worker-thread handle. Dropping it stops the ticker (without a final
/// flush — call `flush_now` first on orderly shutdown).
pub struct ArenaFlusher {
    shared: Arc<Shared>,
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ArenaFlusher {
    /// Start the ticker thread.
    pub fn start(
        arena: Arena,
        master_db: PathBuf,
        control: Option<ControlBlock>,
        interval: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            dirty: AtomicBool::new(false),
            target: Mutex::new(FlushTarget { arena, master_db }),
            control,
        });
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("leyline-flusher".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            if worker.dirty.swap(false, Ordering::SeqCst) {
                                if let Err(e) = worker.flush() {
                                    // Retry on the next tick.
                                    warn!(error = %e, "arena flush failed");
                                    worker.dirty.store(true, Ordering::SeqCst);
                                }
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn flusher thread");

        Self {
            shared,
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Mark the arena dirty. Any number of calls before the next tick
    /// produce exactly one flush.
    pub fn request_flush(&self) {
        self.shared.dirty.store(true, Ordering::SeqCst);
    }

    /// Flush synchronously, regardless of the dirty flag. Used for the
    /// final flush on unmount.
    pub fn flush_now(&self) -> Result<u64> {
        self.shared.dirty.store(false, Ordering::SeqCst);
        self.shared.flush()
    }
}

impl Drop for ArenaFlusher {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
