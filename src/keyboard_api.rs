//! Keyboard capability abstractions.
//! The engine only talks to the OS through these two traits, so everything
//! above them stays platform-agnostic and testable without a real hook.

use std::sync::Arc;

use crate::key_event::KeyEvent;
use crate::Result;

/// Receives every normalized key-down. Runs on the source's dispatch thread
/// and must return promptly.
pub type KeySubscriber = Arc<dyn Fn(KeyEvent) + Send + Sync + 'static>;

/// Global keystroke interception.
pub trait KeystrokeSource: Send {
    /// Install the hook and start delivering events to `subscriber`.
    /// Calling it on a running source is a no-op.
    fn start(&mut self, subscriber: KeySubscriber) -> Result<()>;

    /// Uninstall the hook. Calling it on a stopped source is a no-op.
    fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// One synthetic keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticKey {
    Backspace,
    Enter,
    Unicode(char),
}

/// Synthetic input injection.
pub trait SyntheticInputSink: Send + Sync {
    /// Send one key press and release. The platform may drop the stroke
    /// without reporting it; only failures it does report come back as errors.
    fn send_key(&self, key: SyntheticKey) -> Result<()>;
}
