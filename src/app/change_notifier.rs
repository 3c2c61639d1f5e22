// TailSleuth - app/change_notifier.rs
//
// Coalesces "the log file changed" callbacks into a pending-change counter
// that a consumer drains on its own cadence (a UI frame timer, an analysis
// tick).
//
// Producers call `notify` from whatever thread reads the log file; it is a
// single atomic increment and never blocks.  The consumer calls `drain`,
// an atomic swap-to-zero, so every notification is counted by exactly one
// drain.  Individual sections are not replayed: a consumer that needs them
// asks the log file.
//
// Log files throttle partial batches and only re-check the interval when
// asked, so `drain` polls every watched file first.  Lines held back at the
// end of a burst are therefore counted by the first drain after the interval.
// A notifier watches a given log file at most once.

use crate::core::log_file::{ListenerId, LogFile, LogFileListener};
use crate::core::model::LogFileSection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// Identity of a log file, independent of the vtable of the `dyn` pointer.
fn file_key(log_file: &Arc<dyn LogFile>) -> usize {
    Arc::as_ptr(log_file) as *const () as usize
}

/// Pending-change counter plus a running maximum of the line-width hint.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    pending: AtomicUsize,
    max_line_width: AtomicUsize,
    watched: Mutex<Vec<(usize, Weak<dyn LogFile>)>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one upstream change.
    pub fn notify(&self, _change: LogFileSection) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of changes since the previous drain; resets the counter.
    ///
    /// Watched log files are polled first so lines they were still holding
    /// back for their throttle interval are counted.
    pub fn drain(&self) -> usize {
        let files: Vec<Arc<dyn LogFile>> = self
            .watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(_, file)| file.upgrade())
            .collect();
        for file in files {
            file.poll();
        }
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Number of changes since the previous drain, without resetting.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Re-arm after the consumer failed to act on a drain, so it retries on
    /// its next tick.
    pub fn requeue(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Widest line (in characters) any notifying log file has reported.
    pub fn max_line_width(&self) -> usize {
        self.max_line_width.load(Ordering::Relaxed)
    }

    /// Subscribe to `log_file`.  The subscription lasts until
    /// `Subscription::unregister` is called or the subscription is dropped.
    ///
    /// A log file this notifier already watches is not subscribed again, so
    /// changes are never counted twice; the returned subscription is then
    /// inert (`is_registered()` is `false`) and the first one stays in charge.
    pub fn register(
        self: &Arc<Self>,
        log_file: Arc<dyn LogFile>,
        minimum_interval: Duration,
        max_lines_per_batch: usize,
    ) -> Subscription {
        let key = file_key(&log_file);
        {
            let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
            watched.retain(|(_, file)| file.strong_count() > 0);
            if watched.iter().any(|(k, _)| *k == key) {
                tracing::debug!("Log file already watched by this notifier; not subscribing twice");
                return Subscription {
                    notifier: Arc::clone(self),
                    log_file,
                    id: None,
                };
            }
            watched.push((key, Arc::downgrade(&log_file)));
        }

        let listener: Arc<dyn LogFileListener> = Arc::clone(self) as Arc<dyn LogFileListener>;
        let id = log_file.add_listener(listener, minimum_interval, max_lines_per_batch);
        Subscription {
            notifier: Arc::clone(self),
            log_file,
            id: Some(id),
        }
    }

    fn forget(&self, log_file: &Arc<dyn LogFile>) {
        let key = file_key(log_file);
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(k, _)| *k != key);
    }
}

impl LogFileListener for ChangeNotifier {
    fn on_log_file_modified(&self, log_file: &dyn LogFile, section: LogFileSection) {
        self.max_line_width
            .fetch_max(log_file.max_characters_per_line(), Ordering::Relaxed);
        self.notify(section);
    }
}

/// A live registration of a `ChangeNotifier` on a log file.
pub struct Subscription {
    notifier: Arc<ChangeNotifier>,
    log_file: Arc<dyn LogFile>,
    id: Option<ListenerId>,
}

impl Subscription {
    /// Remove the listener.  Returns `false` if it was already removed (or
    /// never registered).
    pub fn unregister(&mut self) -> bool {
        match self.id.take() {
            Some(id) => {
                self.notifier.forget(&self.log_file);
                self.log_file.remove_listener(id)
            }
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_file::InMemoryLogFile;

    #[test]
    fn test_drain_returns_number_of_notifications() {
        let notifier = ChangeNotifier::new();
        for i in 0..17 {
            notifier.notify(LogFileSection::new(i, 1));
        }
        assert_eq!(notifier.pending(), 17);
        assert_eq!(notifier.drain(), 17);
        assert_eq!(notifier.drain(), 0, "second drain without notify");
    }

    #[test]
    fn test_requeue_forces_next_drain() {
        let notifier = ChangeNotifier::new();
        notifier.notify(LogFileSection::new(0, 1));
        assert_eq!(notifier.drain(), 1);
        notifier.requeue();
        assert!(notifier.drain() > 0);
    }

    /// Every notify from every producer thread is counted by exactly one drain.
    #[test]
    fn test_concurrent_notifies_are_never_lost() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 10_000;

        let notifier = Arc::new(ChangeNotifier::new());
        let mut drained = 0;

        let producers: Vec<_> = (0..THREADS)
            .map(|_| {
                let notifier = Arc::clone(&notifier);
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        notifier.notify(LogFileSection::new(i, 1));
                    }
                })
            })
            .collect();

        while producers.iter().any(|p| !p.is_finished()) {
            drained += notifier.drain();
        }
        for p in producers {
            p.join().unwrap();
        }
        drained += notifier.drain();

        assert_eq!(drained, THREADS * PER_THREAD);
    }

    #[test]
    fn test_subscription_counts_log_file_changes() {
        let file = Arc::new(InMemoryLogFile::new());
        let notifier = Arc::new(ChangeNotifier::new());
        let mut subscription = notifier.register(file.clone(), Duration::ZERO, 10_000);
        assert_eq!(file.listener_count(), 1);

        file.add_line("short");
        file.add_line("a much longer line");
        assert_eq!(notifier.drain(), 2);
        assert_eq!(notifier.max_line_width(), 18);

        assert!(subscription.unregister());
        assert!(!subscription.unregister());
        file.add_line("ignored");
        assert_eq!(notifier.drain(), 0);
    }

    /// The last lines of a burst are held by the throttle; once the file goes
    /// quiet they must still be counted by a later drain.
    #[test]
    fn test_quiet_tail_is_eventually_drained() {
        let file = Arc::new(InMemoryLogFile::new());
        let notifier = Arc::new(ChangeNotifier::new());
        let _subscription = notifier.register(file.clone(), Duration::from_millis(50), 10_000);

        file.add_line("first");
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(notifier.drain(), 1, "held line never signalled");
        assert_eq!(notifier.drain(), 0);
    }

    #[test]
    fn test_registering_same_file_twice_counts_once() {
        let file = Arc::new(InMemoryLogFile::new());
        let notifier = Arc::new(ChangeNotifier::new());
        let first = notifier.register(file.clone(), Duration::ZERO, 10_000);
        let mut second = notifier.register(file.clone(), Duration::ZERO, 10_000);

        assert!(first.is_registered());
        assert!(!second.is_registered());
        assert_eq!(file.listener_count(), 1);

        file.add_line("once");
        assert_eq!(notifier.drain(), 1);

        assert!(!second.unregister());
        drop(second);
        assert_eq!(file.listener_count(), 1, "inert subscription must not unregister");
        drop(first);
        assert_eq!(file.listener_count(), 0);

        let _again = notifier.register(file.clone(), Duration::ZERO, 10_000);
        assert_eq!(file.listener_count(), 1);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let file = Arc::new(InMemoryLogFile::new());
        let notifier = Arc::new(ChangeNotifier::new());
        {
            let _subscription = notifier.register(file.clone(), Duration::ZERO, 100);
            assert_eq!(file.listener_count(), 1);
        }
        assert_eq!(file.listener_count(), 0);
    }
}
