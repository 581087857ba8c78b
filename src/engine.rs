//! Expansion engine: wires the keystroke source, buffer, matcher and
//! sequencer together.
//!
//! Key events are handled synchronously on the source's dispatch thread.
//! Buffer updates and matching are cheap and happen under one mutex. A match
//! flips the engine to [`EngineState::Replacing`] under that same lock, and
//! the keystroke synthesis is handed to a dedicated worker thread. Until the
//! worker finishes, every incoming event is discarded. This drops the
//! engine's own synthetic output along with anything the user types during
//! the window.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::InputBuffer;
use crate::config::EngineConfig;
use crate::key_event::KeyEvent;
use crate::keyboard_api::{KeySubscriber, KeystrokeSource, SyntheticInputSink};
use crate::matcher::{find_match, is_delimiter, MatchResult, SnippetProvider};
use crate::sequencer::OutputSequencer;
use crate::{ExpandrError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disabled,
    Idle,
    Replacing,
}

/// Broadcast after a keyword has been replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionNotice {
    pub keyword: String,
    pub content: String,
    pub trigger: char,
    pub expanded_at: DateTime<Local>,
}

enum Job {
    Replace(MatchResult),
    Shutdown,
}

struct Core {
    state: EngineState,
    buffer: InputBuffer,
    /// Where a running replacement lands: `Idle` unless the engine was
    /// disabled meanwhile.
    enabled_after_replace: bool,
}

struct Shared {
    core: Mutex<Core>,
    provider: Arc<dyn SnippetProvider>,
    jobs: Sender<Job>,
    observers: Mutex<Vec<Sender<ExpansionNotice>>>,
}

pub struct ExpansionEngine<K: KeystrokeSource> {
    source: K,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl<K: KeystrokeSource> ExpansionEngine<K> {
    /// Builds a disabled engine and spawns its replacement worker. The
    /// source is not installed until [`start`](Self::start).
    pub fn new(
        source: K,
        sink: Arc<dyn SyntheticInputSink>,
        provider: Arc<dyn SnippetProvider>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let (jobs, queue) = unbounded();
        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                state: EngineState::Disabled,
                buffer: InputBuffer::new(config.buffer_capacity),
                enabled_after_replace: false,
            }),
            provider,
            jobs,
            observers: Mutex::new(Vec::new()),
        });

        let sequencer = OutputSequencer::new(sink, config.keystroke_delay());
        let pre_replace_delay = config.pre_replace_delay();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("expandr-replacer".into())
            .spawn(move || run_worker(worker_shared, sequencer, pre_replace_delay, queue))?;

        debug!(
            buffer_capacity = config.buffer_capacity,
            keystroke_delay_ms = config.keystroke_delay_ms,
            "Expansion engine created"
        );

        Ok(Self {
            source,
            shared,
            worker: Some(worker),
        })
    }

    /// Installs the keystroke source. Installation failures are returned
    /// as is and not retried.
    pub fn start(&mut self) -> Result<()> {
        if self.source.is_running() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let subscriber: KeySubscriber = Arc::new(move |event| shared.handle_key_event(event));
        self.source.start(subscriber)?;
        info!("Keystroke source installed");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.source.is_running() {
            return Ok(());
        }
        self.source.stop()?;
        info!("Keystroke source removed");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.source.is_running()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.set_enabled(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        let core = self.shared.core.lock();
        match core.state {
            EngineState::Disabled => false,
            EngineState::Idle => true,
            EngineState::Replacing => core.enabled_after_replace,
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.core.lock().state
    }

    pub fn buffer_contents(&self) -> String {
        self.shared.core.lock().buffer.contents()
    }

    /// Registers an observer for successful expansions. Notices are sent
    /// without waiting; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<ExpansionNotice> {
        let (tx, rx) = unbounded();
        self.shared.observers.lock().push(tx);
        rx
    }

    /// Processes one key-down exactly as the installed source would.
    pub fn handle_key_event(&self, event: KeyEvent) {
        self.shared.handle_key_event(event);
    }
}

impl<K: KeystrokeSource> Drop for ExpansionEngine<K> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to remove keystroke source on shutdown: {}", e);
        }
        let _ = self.shared.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Replacement worker terminated abnormally");
            }
        }
        self.shared.core.lock().buffer.clear();
        debug!("Expansion engine shut down");
    }
}

impl Shared {
    fn handle_key_event(&self, event: KeyEvent) {
        let result = {
            let mut core = self.core.lock();
            match core.state {
                EngineState::Disabled => return,
                EngineState::Replacing => {
                    trace!(vk = event.vk_code, "Discarding key event during replacement");
                    return;
                }
                EngineState::Idle => {}
            }

            let Some(appended) = core.buffer.process_key_event(&event) else {
                return;
            };
            if !is_delimiter(appended) {
                return;
            }

            let contents = core.buffer.contents();
            let Some(result) = find_match(&contents, appended, self.provider.as_ref()) else {
                return;
            };

            core.state = EngineState::Replacing;
            core.enabled_after_replace = true;
            result
        };

        debug!(keyword = %result.entry.keyword, "Keyword matched, handing off replacement");
        if self.jobs.send(Job::Replace(result)).is_err() {
            let err = ExpandrError::Worker("replacement worker is not running".into());
            error!("{}", err);
            self.finish_replacement();
        }
    }

    fn set_enabled(&self, enabled: bool) {
        let mut core = self.core.lock();
        match core.state {
            EngineState::Replacing => {
                core.enabled_after_replace = enabled;
                if !enabled {
                    core.buffer.clear();
                }
            }
            _ if enabled => core.state = EngineState::Idle,
            _ => {
                core.state = EngineState::Disabled;
                core.buffer.clear();
            }
        }
        info!("Expansion {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Leaves `Replacing`. Runs on every exit path of a replacement.
    fn finish_replacement(&self) {
        let mut core = self.core.lock();
        core.buffer.clear();
        core.state = if core.enabled_after_replace {
            EngineState::Idle
        } else {
            EngineState::Disabled
        };
    }

    fn notify(&self, result: &MatchResult) {
        let notice = ExpansionNotice {
            keyword: result.entry.keyword.clone(),
            content: result.entry.content.clone(),
            trigger: result.trigger,
            expanded_at: Local::now(),
        };
        self.observers
            .lock()
            .retain(|observer| observer.send(notice.clone()).is_ok());
    }
}

fn run_worker(
    shared: Arc<Shared>,
    sequencer: OutputSequencer,
    pre_replace_delay: Duration,
    queue: Receiver<Job>,
) {
    for job in queue {
        let result = match job {
            Job::Replace(result) => result,
            Job::Shutdown => break,
        };

        if !pre_replace_delay.is_zero() {
            thread::sleep(pre_replace_delay);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| sequencer.replace(&result)));
        shared.finish_replacement();

        match outcome {
            Ok(Ok(())) => {
                info!(keyword = %result.entry.keyword, "Snippet expanded");
                shared.notify(&result);
            }
            Ok(Err(e)) => error!(keyword = %result.entry.keyword, "Replacement failed: {}", e),
            Err(_) => warn!(keyword = %result.entry.keyword, "Replacement panicked; engine reset"),
        }
    }
    debug!("Replacement worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_event::{typed, typed_str, vk};
    use crate::keyboard_api::mock::{MockInputSink, MockKeystrokeSource};
    use crate::keyboard_api::SyntheticKey;
    use crate::matcher::{KeywordEntry, SnippetCatalog};

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        engine: ExpansionEngine<MockKeystrokeSource>,
        source: MockKeystrokeSource,
        sink: MockInputSink,
        catalog: Arc<SnippetCatalog>,
    }

    impl Harness {
        fn new() -> Self {
            let config = EngineConfig {
                keystroke_delay_ms: 0,
                pre_replace_delay_ms: 0,
                ..EngineConfig::default()
            };
            let source = MockKeystrokeSource::new();
            let sink = MockInputSink::new();
            let catalog = Arc::new(SnippetCatalog::new(vec![
                KeywordEntry::new("btw", "by the way"),
                KeywordEntry::new("omw", "on my way"),
                KeywordEntry::new("brb", "be right back"),
            ]));
            let mut engine = ExpansionEngine::new(
                source.clone(),
                Arc::new(sink.clone()),
                catalog.clone(),
                &config,
            )
            .unwrap();
            engine.start().unwrap();
            engine.set_enabled(true);

            Self {
                engine,
                source,
                sink,
                catalog,
            }
        }

        /// Physical typing: the text lands in the document and the hook
        /// sees the key.
        fn type_text(&self, text: &str) {
            for event in typed_str(text) {
                self.sink.type_physical(&event);
                self.source.emit(event);
            }
        }

        fn wait_for_idle(&self) {
            let deadline = std::time::Instant::now() + WAIT;
            while self.engine.state() == EngineState::Replacing {
                assert!(std::time::Instant::now() < deadline, "replacement never finished");
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    #[test]
    fn test_initial_state_disabled() {
        let source = MockKeystrokeSource::new();
        let engine = ExpansionEngine::new(
            source.clone(),
            Arc::new(MockInputSink::new()),
            Arc::new(SnippetCatalog::default()),
            &EngineConfig::default(),
        )
        .unwrap();

        assert_eq!(engine.state(), EngineState::Disabled);
        assert!(!engine.is_enabled());
        assert!(!engine.is_running());

        engine.handle_key_event(typed('a'));
        assert_eq!(engine.buffer_contents(), "");
    }

    #[test]
    fn test_start_stop_installs_source() {
        let mut harness = Harness::new();
        assert!(harness.engine.is_running());
        harness.engine.start().unwrap();
        assert_eq!(harness.source.start_count(), 1);

        harness.engine.stop().unwrap();
        assert!(!harness.engine.is_running());
        harness.type_text("abc");
        assert_eq!(harness.engine.buffer_contents(), "");
    }

    #[test]
    fn test_start_failure_surfaces() {
        let source = MockKeystrokeSource::new();
        source.set_fail_next_start(true);
        let mut engine = ExpansionEngine::new(
            source,
            Arc::new(MockInputSink::new()),
            Arc::new(SnippetCatalog::default()),
            &EngineConfig::default(),
        )
        .unwrap();

        let err = engine.start().unwrap_err();
        assert!(matches!(err, ExpandrError::Keyboard(_)));
        assert!(!engine.is_running());
    }

    #[test]
    fn test_expansion_round_trip() {
        let harness = Harness::new();
        let notices = harness.engine.subscribe();

        harness.type_text("ok brb\n");

        let notice = notices.recv_timeout(WAIT).unwrap();
        assert_eq!(notice.keyword, "brb");
        assert_eq!(notice.content, "be right back");
        assert_eq!(notice.trigger, '\n');

        harness.wait_for_idle();
        assert_eq!(harness.sink.document(), "ok be right back\n");

        let actions = harness.sink.actions();
        assert_eq!(actions[..4], [SyntheticKey::Backspace; 4]);
        assert_eq!(actions.last(), Some(&SyntheticKey::Enter));
        assert_eq!(actions.len(), 4 + "be right back".len() + 1);

        assert_eq!(harness.engine.buffer_contents(), "");
        assert_eq!(harness.engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_no_match_keeps_buffering() {
        let harness = Harness::new();
        harness.type_text("dibtw ");
        assert_eq!(harness.engine.state(), EngineState::Idle);
        assert_eq!(harness.engine.buffer_contents(), "dibtw ");
        assert!(harness.sink.actions().is_empty());
    }

    #[test]
    fn test_echoed_input_is_discarded() {
        let harness = Harness::new();
        harness.sink.echo_into(&harness.source);
        let release = harness.sink.hold();
        let notices = harness.engine.subscribe();

        harness.type_text("hi btw ");
        assert_eq!(harness.engine.state(), EngineState::Replacing);

        // Fast typing and stray echoes during the window go nowhere.
        harness.source.emit_all(typed_str("omw "));
        harness.source.emit(KeyEvent::new(vk::BACK, None));
        assert_eq!(harness.engine.state(), EngineState::Replacing);

        release.send(()).unwrap();
        notices.recv_timeout(WAIT).unwrap();
        harness.wait_for_idle();

        assert_eq!(harness.engine.buffer_contents(), "");
        assert_eq!(harness.sink.document(), "hi by the way ");
        // Exactly one replacement ran.
        assert_eq!(harness.sink.actions().len(), 4 + "by the way".len() + 1);
        assert!(notices.try_recv().is_err());
    }

    #[test]
    fn test_consecutive_expansions() {
        let harness = Harness::new();
        let notices = harness.engine.subscribe();

        harness.type_text("btw.");
        notices.recv_timeout(WAIT).unwrap();
        harness.wait_for_idle();

        harness.type_text(" omw!");
        notices.recv_timeout(WAIT).unwrap();
        harness.wait_for_idle();

        assert_eq!(harness.sink.document(), "by the way. on my way!");
    }

    #[test]
    fn test_failed_replacement_resets_to_idle() {
        let harness = Harness::new();
        let notices = harness.engine.subscribe();
        harness.sink.fail_at(1);

        harness.type_text("btw ");
        harness.wait_for_idle();

        assert_eq!(harness.engine.state(), EngineState::Idle);
        assert_eq!(harness.engine.buffer_contents(), "");
        assert!(notices.try_recv().is_err());

        // The pipeline keeps working after the failure.
        harness.type_text("omw ");
        assert_eq!(notices.recv_timeout(WAIT).unwrap().keyword, "omw");
    }

    #[test]
    fn test_panicking_sink_does_not_kill_worker() {
        let harness = Harness::new();
        let notices = harness.engine.subscribe();
        harness.sink.set_panic_next(true);

        harness.type_text("btw ");
        harness.wait_for_idle();
        assert_eq!(harness.engine.state(), EngineState::Idle);

        harness.type_text("btw ");
        assert_eq!(notices.recv_timeout(WAIT).unwrap().keyword, "btw");
    }

    #[test]
    fn test_disable_is_idempotent() {
        let harness = Harness::new();
        harness.type_text("hello");

        harness.engine.set_enabled(false);
        assert_eq!(harness.engine.state(), EngineState::Disabled);
        assert_eq!(harness.engine.buffer_contents(), "");

        harness.engine.set_enabled(false);
        assert_eq!(harness.engine.state(), EngineState::Disabled);
        assert_eq!(harness.engine.buffer_contents(), "");

        harness.type_text("btw ");
        assert!(harness.sink.actions().is_empty());

        harness.engine.set_enabled(true);
        assert!(harness.engine.is_enabled());
        harness.type_text("ab");
        assert_eq!(harness.engine.buffer_contents(), "ab");
    }

    #[test]
    fn test_disable_during_replacement_lands_disabled() {
        let harness = Harness::new();
        let release = harness.sink.hold();
        let notices = harness.engine.subscribe();

        harness.type_text("btw ");
        assert_eq!(harness.engine.state(), EngineState::Replacing);
        harness.engine.set_enabled(false);
        assert!(!harness.engine.is_enabled());

        drop(release);
        notices.recv_timeout(WAIT).unwrap();
        harness.wait_for_idle();

        assert_eq!(harness.engine.state(), EngineState::Disabled);
        harness.type_text("omw ");
        assert_eq!(harness.engine.buffer_contents(), "");
    }

    #[test]
    fn test_catalog_changes_seen_on_next_match() {
        let harness = Harness::new();
        let notices = harness.engine.subscribe();

        harness.catalog.replace(vec![KeywordEntry::new("ty", "thank you")]);
        harness.type_text("btw ");
        assert_eq!(harness.engine.state(), EngineState::Idle);

        harness.type_text("ty,");
        assert_eq!(notices.recv_timeout(WAIT).unwrap().content, "thank you");
    }

    #[test]
    fn test_dropped_observer_pruned() {
        let harness = Harness::new();
        drop(harness.engine.subscribe());
        let live = harness.engine.subscribe();

        harness.type_text("btw ");
        assert_eq!(live.recv_timeout(WAIT).unwrap().keyword, "btw");
        harness.wait_for_idle();
        assert_eq!(harness.engine.shared.observers.lock().len(), 1);
    }

    #[test]
    fn test_navigation_breaks_keyword() {
        let harness = Harness::new();
        harness.type_text("bt");
        harness.source.emit(KeyEvent::new(vk::LEFT, None));
        harness.type_text("w ");
        assert_eq!(harness.engine.buffer_contents(), "w ");
        assert!(harness.sink.actions().is_empty());
    }

    #[test]
    fn test_backspace_onto_delimiter_does_not_retrigger() {
        let harness = Harness::new();
        harness.type_text("x  ");
        harness.source.emit(KeyEvent::new(vk::BACK, None));
        assert_eq!(harness.engine.buffer_contents(), "x ");
        assert!(harness.sink.actions().is_empty());
    }
}
