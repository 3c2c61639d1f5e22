// TailSleuth - core/log_file.rs
//
// The log-file capability consumed by the rest of the crate, plus the
// listener bookkeeping a log-file implementation embeds to report appended
// lines at a bounded rate.
//
// Detecting that a file on disk grew is not done here: an implementation of
// `LogFile` tells its `ListenerCollection` how many lines it has read so far
// and the collection turns that into `LogFileSection` callbacks.
//
// Throttling rules (per listener):
//   - A full batch of `max_lines_per_batch` lines is delivered as soon as it
//     is available.
//   - A partial batch is delivered only once `minimum_interval` has passed
//     since that listener's previous delivery, or on an explicit `flush`.
//   - A reset (file truncated/replaced) is delivered immediately.
//   - The interval is only checked when the collection is told about a read
//     or polled.  Consumers poll through `LogFile::poll` so the tail of a
//     burst still goes out once the file has gone quiet.
//
// Callbacks run on the thread that reported the read while the collection's
// lock is held, so a listener must not add or remove listeners on the same
// log file from inside its callback.

use crate::core::model::{LogFileSection, LogLineIndex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

// =============================================================================
// Capability traits
// =============================================================================

/// Receives notifications about lines appended to (or removed from) a log file.
pub trait LogFileListener: Send + Sync {
    /// `section` describes newly available lines, or is
    /// `LogFileSection::RESET` when the file was truncated or replaced.
    fn on_log_file_modified(&self, log_file: &dyn LogFile, section: LogFileSection);
}

/// Identifies one listener registration on one log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An append-only log source.  Implementations never expose file contents to
/// this crate beyond what analysers choose to read.
pub trait LogFile: Send + Sync {
    /// Total number of lines currently available.
    fn count(&self) -> usize;

    /// Width hint: the longest line seen so far, in characters.
    fn max_characters_per_line(&self) -> usize;

    /// Register `listener`; it is told about existing lines right away and
    /// about new ones according to the throttling rules above.
    fn add_listener(
        &self,
        listener: Arc<dyn LogFileListener>,
        minimum_interval: Duration,
        max_lines_per_batch: usize,
    ) -> ListenerId;

    /// Remove a listener.  Returns `false` if it was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Re-check throttled listeners against the clock and deliver partial
    /// batches whose minimum interval has passed.  Nothing else happens when
    /// no lines are pending.
    fn poll(&self);
}

// =============================================================================
// Per-listener throttle
// =============================================================================

struct ListenerNotifier {
    id: ListenerId,
    listener: Arc<dyn LogFileListener>,
    minimum_interval: Duration,
    max_lines_per_batch: usize,
    /// Number of lines already reported to the listener.
    reported: usize,
    /// When the listener was last called.
    last_flush: Instant,
}

impl ListenerNotifier {
    fn new(
        id: ListenerId,
        listener: Arc<dyn LogFileListener>,
        minimum_interval: Duration,
        max_lines_per_batch: usize,
        now: Instant,
    ) -> Self {
        Self {
            id,
            listener,
            minimum_interval,
            max_lines_per_batch: max_lines_per_batch.max(1),
            reported: 0,
            last_flush: now,
        }
    }

    /// The log file has read up to `total` lines (`None` = reset).
    fn on_read(&mut self, log_file: &dyn LogFile, total: Option<usize>, now: Instant) {
        let Some(total) = total else {
            self.reported = 0;
            self.deliver(log_file, LogFileSection::RESET, now);
            return;
        };

        // A smaller total than already reported is a stale report from a
        // racing writer; the next report covers it.
        if total <= self.reported {
            return;
        }

        self.deliver_full_batches(log_file, total, now);

        if total > self.reported && now.duration_since(self.last_flush) >= self.minimum_interval {
            self.deliver_remainder(log_file, total, now);
        }
    }

    /// Deliver everything up to `total`, ignoring the interval.
    fn flush(&mut self, log_file: &dyn LogFile, total: usize, now: Instant) {
        if total <= self.reported {
            return;
        }
        self.deliver_full_batches(log_file, total, now);
        if total > self.reported {
            self.deliver_remainder(log_file, total, now);
        }
    }

    fn deliver_full_batches(&mut self, log_file: &dyn LogFile, total: usize, now: Instant) {
        while total - self.reported >= self.max_lines_per_batch {
            let section = LogFileSection::new(self.reported, self.max_lines_per_batch);
            self.reported += self.max_lines_per_batch;
            self.deliver(log_file, section, now);
        }
    }

    fn deliver_remainder(&mut self, log_file: &dyn LogFile, total: usize, now: Instant) {
        let section = LogFileSection::new(self.reported, total - self.reported);
        self.reported = total;
        self.deliver(log_file, section, now);
    }

    fn deliver(&mut self, log_file: &dyn LogFile, section: LogFileSection, now: Instant) {
        self.last_flush = now;
        self.listener.on_log_file_modified(log_file, section);
    }
}

// =============================================================================
// ListenerCollection
// =============================================================================

/// Thread-safe table of listener registrations for one log file.
pub struct ListenerCollection {
    next_id: AtomicU64,
    notifiers: Mutex<Vec<ListenerNotifier>>,
}

impl ListenerCollection {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            notifiers: Mutex::new(Vec::new()),
        }
    }

    /// Create a subscription and immediately report the `current_count`
    /// lines the log file already holds.
    pub fn register(
        &self,
        log_file: &dyn LogFile,
        current_count: usize,
        listener: Arc<dyn LogFileListener>,
        minimum_interval: Duration,
        max_lines_per_batch: usize,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = Instant::now();
        let mut notifier =
            ListenerNotifier::new(id, listener, minimum_interval, max_lines_per_batch, now);

        let mut notifiers = self.notifiers.lock().unwrap_or_else(PoisonError::into_inner);
        notifier.flush(log_file, current_count, now);
        notifiers.push(notifier);

        tracing::debug!(
            listener = id.0,
            interval_ms = minimum_interval.as_millis() as u64,
            max_lines_per_batch,
            "Log file listener registered"
        );
        id
    }

    /// Remove a subscription.  No callback is delivered to it once this
    /// returns; a callback already running on another thread completes.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut notifiers = self.notifiers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = notifiers.len();
        notifiers.retain(|n| n.id != id);
        let removed = notifiers.len() != before;
        if removed {
            tracing::debug!(listener = id.0, "Log file listener removed");
        }
        removed
    }

    /// The log file has read `total` lines so far, or was reset (`None`).
    pub fn on_read(&self, log_file: &dyn LogFile, total: Option<usize>) {
        let now = Instant::now();
        let mut notifiers = self.notifiers.lock().unwrap_or_else(PoisonError::into_inner);
        for notifier in notifiers.iter_mut() {
            notifier.on_read(log_file, total, now);
        }
    }

    /// No new lines were read, but time passed: deliver partial batches
    /// whose interval has elapsed.
    pub fn poll(&self, log_file: &dyn LogFile, total: usize) {
        self.on_read(log_file, Some(total));
    }

    /// Deliver every pending partial batch regardless of the interval.
    pub fn flush(&self, log_file: &dyn LogFile, total: usize) {
        let now = Instant::now();
        let mut notifiers = self.notifiers.lock().unwrap_or_else(PoisonError::into_inner);
        for notifier in notifiers.iter_mut() {
            notifier.flush(log_file, total, now);
        }
    }

    pub fn len(&self) -> usize {
        self.notifiers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ListenerCollection {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// InMemoryLogFile
// =============================================================================

/// A log file whose lines are pushed by the caller (stdin, tests, network
/// feeds).  Every push is reported to listeners through the throttle.
pub struct InMemoryLogFile {
    lines: Mutex<Vec<String>>,
    count: AtomicUsize,
    max_characters_per_line: AtomicUsize,
    listeners: ListenerCollection,
}

impl InMemoryLogFile {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
            max_characters_per_line: AtomicUsize::new(0),
            listeners: ListenerCollection::new(),
        }
    }

    /// Append one line.
    pub fn add_line(&self, line: impl Into<String>) {
        self.add_lines(std::iter::once(line.into()));
    }

    /// Append several lines as one read.
    pub fn add_lines<I>(&self, lines: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let total = {
            let mut stored = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            for line in lines {
                let line = line.into();
                self.max_characters_per_line
                    .fetch_max(line.chars().count(), Ordering::Relaxed);
                stored.push(line);
            }
            self.count.store(stored.len(), Ordering::Release);
            stored.len()
        };
        self.listeners.on_read(self, Some(total));
    }

    /// Drop every line and tell listeners the file was reset.
    pub fn clear(&self) {
        {
            let mut stored = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            stored.clear();
            self.count.store(0, Ordering::Release);
            self.max_characters_per_line.store(0, Ordering::Relaxed);
        }
        self.listeners.on_read(self, None);
    }

    /// The source reached its end: deliver any partial batch now.
    pub fn flush(&self) {
        self.listeners.flush(self, self.count());
    }

    /// Copy of the line at `index`, if present.
    pub fn line(&self, index: LogLineIndex) -> Option<String> {
        let ordinal = index.ordinal()?;
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ordinal)
            .cloned()
    }

    /// Copy of every line in `section` that exists.
    pub fn lines(&self, section: LogFileSection) -> Vec<String> {
        let stored = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        section
            .indices()
            .filter_map(|i| i.ordinal().and_then(|o| stored.get(o).cloned()))
            .collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for InMemoryLogFile {
    fn default() -> Self {
        Self::new()
    }
}

impl LogFile for InMemoryLogFile {
    fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn max_characters_per_line(&self) -> usize {
        self.max_characters_per_line.load(Ordering::Relaxed)
    }

    fn add_listener(
        &self,
        listener: Arc<dyn LogFileListener>,
        minimum_interval: Duration,
        max_lines_per_batch: usize,
    ) -> ListenerId {
        self.listeners.register(
            self,
            self.count(),
            listener,
            minimum_interval,
            max_lines_per_batch,
        )
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    fn poll(&self) {
        self.listeners.poll(self, self.count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sections: Mutex<Vec<LogFileSection>>,
    }

    impl Recorder {
        fn sections(&self) -> Vec<LogFileSection> {
            self.sections.lock().unwrap().clone()
        }
    }

    impl LogFileListener for Recorder {
        fn on_log_file_modified(&self, _log_file: &dyn LogFile, section: LogFileSection) {
            self.sections.lock().unwrap().push(section);
        }
    }

    fn notifier(recorder: &Arc<Recorder>, interval_ms: u64, batch: usize, now: Instant) -> ListenerNotifier {
        ListenerNotifier::new(
            ListenerId(1),
            recorder.clone(),
            Duration::from_millis(interval_ms),
            batch,
            now,
        )
    }

    /// Partial batches wait for the interval; the next read after it elapses
    /// delivers everything accumulated in one section.
    #[test]
    fn test_partial_batch_waits_for_interval() {
        let file = InMemoryLogFile::new();
        let recorder = Arc::new(Recorder::default());
        let t0 = Instant::now();
        let mut n = notifier(&recorder, 100, 1000, t0);

        n.on_read(&file, Some(3), t0 + Duration::from_millis(10));
        n.on_read(&file, Some(7), t0 + Duration::from_millis(50));
        assert!(recorder.sections().is_empty());

        n.on_read(&file, Some(9), t0 + Duration::from_millis(120));
        assert_eq!(recorder.sections(), vec![LogFileSection::new(0, 9)]);
    }

    /// Full batches go out immediately and never exceed the batch size.
    #[test]
    fn test_full_batches_delivered_immediately() {
        let file = InMemoryLogFile::new();
        let recorder = Arc::new(Recorder::default());
        let t0 = Instant::now();
        let mut n = notifier(&recorder, 10_000, 4, t0);

        n.on_read(&file, Some(10), t0);
        assert_eq!(
            recorder.sections(),
            vec![LogFileSection::new(0, 4), LogFileSection::new(4, 4)]
        );

        n.flush(&file, 10, t0);
        assert_eq!(recorder.sections().last(), Some(&LogFileSection::new(8, 2)));
    }

    #[test]
    fn test_reset_is_immediate_and_restarts_numbering() {
        let file = InMemoryLogFile::new();
        let recorder = Arc::new(Recorder::default());
        let t0 = Instant::now();
        let mut n = notifier(&recorder, 10_000, 100, t0);

        n.flush(&file, 5, t0);
        n.on_read(&file, None, t0);
        n.flush(&file, 2, t0);
        assert_eq!(
            recorder.sections(),
            vec![
                LogFileSection::new(0, 5),
                LogFileSection::RESET,
                LogFileSection::new(0, 2)
            ]
        );
    }

    #[test]
    fn test_stale_smaller_total_is_ignored() {
        let file = InMemoryLogFile::new();
        let recorder = Arc::new(Recorder::default());
        let t0 = Instant::now();
        let mut n = notifier(&recorder, 0, 100, t0);

        n.on_read(&file, Some(5), t0);
        n.on_read(&file, Some(3), t0);
        assert_eq!(recorder.sections(), vec![LogFileSection::new(0, 5)]);
    }

    /// A burst followed by silence is delivered by the first poll after the
    /// interval; polls before it and after it deliver nothing.
    #[test]
    fn test_poll_delivers_quiet_tail_after_interval() {
        let file = InMemoryLogFile::new();
        let recorder = Arc::new(Recorder::default());
        let t0 = Instant::now();
        let mut n = notifier(&recorder, 100, 1000, t0);

        n.on_read(&file, Some(2), t0 + Duration::from_millis(10));
        n.on_read(&file, Some(2), t0 + Duration::from_millis(60));
        assert!(recorder.sections().is_empty());

        n.on_read(&file, Some(2), t0 + Duration::from_millis(150));
        n.on_read(&file, Some(2), t0 + Duration::from_millis(400));
        assert_eq!(recorder.sections(), vec![LogFileSection::new(0, 2)]);
    }

    #[test]
    fn test_in_memory_poll_releases_held_lines() {
        let file = InMemoryLogFile::new();
        let recorder = Arc::new(Recorder::default());
        file.add_listener(recorder.clone(), Duration::from_millis(20), 1000);

        file.add_line("first");
        std::thread::sleep(Duration::from_millis(60));
        file.poll();
        assert_eq!(recorder.sections(), vec![LogFileSection::new(0, 1)]);
    }

    /// New listeners learn about existing content on registration.
    #[test]
    fn test_register_reports_existing_lines() {
        let file = InMemoryLogFile::new();
        file.add_lines(["a", "bb", "ccc"]);

        let recorder = Arc::new(Recorder::default());
        let id = file.add_listener(recorder.clone(), Duration::from_secs(60), 2);
        assert_eq!(
            recorder.sections(),
            vec![LogFileSection::new(0, 2), LogFileSection::new(2, 1)]
        );
        assert_eq!(file.max_characters_per_line(), 3);

        assert!(file.remove_listener(id));
        assert!(!file.remove_listener(id));
        file.add_lines(["d", "e", "f", "g"]);
        file.flush();
        assert_eq!(recorder.sections().len(), 2, "no callbacks after removal");
    }

    #[test]
    fn test_in_memory_clear_notifies_reset() {
        let file = InMemoryLogFile::new();
        let recorder = Arc::new(Recorder::default());
        file.add_listener(recorder.clone(), Duration::ZERO, 100);

        file.add_line("hello");
        file.clear();
        assert_eq!(file.count(), 0);
        assert_eq!(
            recorder.sections(),
            vec![LogFileSection::new(0, 1), LogFileSection::RESET]
        );
        assert_eq!(file.line(LogLineIndex::new(0)), None);
    }
}
