//! Turns a keyword match into the synthetic keystrokes that replace it.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::keyboard_api::{SyntheticInputSink, SyntheticKey};
use crate::matcher::MatchResult;
use crate::Result;

pub const DEFAULT_KEYSTROKE_DELAY_MS: u64 = 5;

pub struct OutputSequencer {
    sink: Arc<dyn SyntheticInputSink>,
    keystroke_delay: Duration,
}

impl OutputSequencer {
    pub fn new(sink: Arc<dyn SyntheticInputSink>, keystroke_delay: Duration) -> Self {
        Self {
            sink,
            keystroke_delay,
        }
    }

    /// Keystrokes for `result`, in the order they must reach the target:
    /// one backspace per keyword character plus one for the trigger, the
    /// content, then the trigger again.
    pub fn plan(result: &MatchResult) -> Vec<SyntheticKey> {
        let content = &result.entry.content;
        let mut keys = Vec::with_capacity(result.keyword_length + content.len() + 2);

        keys.extend(std::iter::repeat(SyntheticKey::Backspace).take(result.keyword_length + 1));

        let mut chars = content.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\r' && chars.peek() == Some(&'\n') {
                continue;
            }
            keys.push(key_for(c));
        }

        keys.push(key_for(result.trigger));
        keys
    }

    /// Sends the whole plan, pausing after every keystroke but the last.
    /// Stops at the first keystroke the sink rejects.
    pub fn replace(&self, result: &MatchResult) -> Result<()> {
        let keys = Self::plan(result);
        debug!(
            keyword = %result.entry.keyword,
            keystrokes = keys.len(),
            "Replacing keyword"
        );

        let last = keys.len().saturating_sub(1);
        for (index, key) in keys.into_iter().enumerate() {
            trace!(?key, "Sending synthetic key");
            self.sink.send_key(key)?;
            if index < last && !self.keystroke_delay.is_zero() {
                thread::sleep(self.keystroke_delay);
            }
        }
        Ok(())
    }
}

fn key_for(c: char) -> SyntheticKey {
    match c {
        '\n' => SyntheticKey::Enter,
        c => SyntheticKey::Unicode(c),
    }
}
