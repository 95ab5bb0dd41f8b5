//! Background cleanup thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::store::StoreInner;

/// How often a sleeping janitor checks for the stop signal.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Drives the store's cleanup tick on a fixed interval.
///
/// The thread holds only a weak reference to the store, so an abandoned
/// store is not kept alive by its own janitor.
pub(crate) struct Janitor {
    handle: JoinHandle<()>,
    stop_flag: Arc<AtomicBool>,
}

impl Janitor {
    /// Spawn a janitor thread ticking every `interval`.
    pub(crate) fn spawn(store: Weak<StoreInner>, interval: Duration) -> std::io::Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = stop_flag.clone();

        let handle = thread::Builder::new()
            .name("umbra-janitor".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match store.upgrade() {
                        Some(inner) => inner.tick(),
                        None => break,
                    }

                    // Sleep out the interval in slices so a close does not
                    // have to wait out a full period.
                    let mut remaining = interval;
                    while !stop.load(Ordering::Relaxed) && remaining > Duration::ZERO {
                        let slice = remaining.min(STOP_POLL);
                        thread::sleep(slice);
                        remaining = remaining.saturating_sub(slice);
                    }
                }
            })?;

        Ok(Janitor { handle, stop_flag })
    }

    /// Signal the thread to stop and wait for it to exit.
    pub(crate) fn stop(self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}
