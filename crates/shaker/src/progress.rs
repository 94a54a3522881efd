use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Progress reporting and cooperative cancellation
pub trait ProgressSink: Sync {
    fn report(&self, message: &str);

    fn set_max(&self, _max: usize) {}

    fn increment(&self) {}

    fn is_canceled(&self) -> bool;
}

/// Reports progress through the `log` facade
#[derive(Debug, Default)]
pub struct LogProgress {
    canceled: AtomicBool,
    max: AtomicUsize,
    done: AtomicUsize,
}

impl LogProgress {
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

impl ProgressSink for LogProgress {
    fn report(&self, message: &str) {
        log::info!("{}", message);
    }

    fn set_max(&self, max: usize) {
        self.max.store(max, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
    }

    fn increment(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let max = self.max.load(Ordering::Relaxed);
        if max >= 10 && done % (max / 10) == 0 {
            log::trace!("- {}/{}", done, max);
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }
}
