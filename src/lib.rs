//! Expandr - keystroke-level text expansion
//!
//! Watches global keystrokes, keeps a short buffer of what was typed, and
//! when a keyword is completed by a delimiter replaces it in place with
//! synthetic keystrokes. The core is platform-agnostic. The OS-facing pieces
//! sit behind [`KeystrokeSource`] and [`SyntheticInputSink`].

pub mod buffer;
pub mod config;
pub mod engine;
pub mod errors;
pub mod key_event;
pub mod keyboard_api;
pub mod matcher;
#[cfg(windows)]
pub mod platform;
pub mod sequencer;

pub use buffer::InputBuffer;
pub use config::{load_config, load_config_from, AppConfig, EngineConfig};
pub use engine::{EngineState, ExpansionEngine, ExpansionNotice};
pub use errors::{ConfigError, ExpandrError, KeyboardError, Result};
pub use key_event::KeyEvent;
pub use keyboard_api::{KeySubscriber, KeystrokeSource, SyntheticInputSink, SyntheticKey};
pub use matcher::{find_match, KeywordEntry, MatchResult, SnippetCatalog, SnippetProvider};
#[cfg(windows)]
pub use platform::{WindowsInputSink, WindowsKeystrokeSource};
pub use sequencer::OutputSequencer;
