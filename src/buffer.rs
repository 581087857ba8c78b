//! Rolling window of the characters typed just before the caret.

use std::collections::VecDeque;

use crate::key_event::KeyEvent;

pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct InputBuffer {
    chars: VecDeque<char>,
    capacity: usize,
}

impl InputBuffer {
    /// A zero capacity is bumped to one so the buffer can hold the trigger.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, c: char) {
        self.chars.push_back(c);
        while self.chars.len() > self.capacity {
            self.chars.pop_front();
        }
    }

    /// Drops the last `n` characters, or nothing if fewer are buffered.
    pub fn remove_last(&mut self, n: usize) {
        if n <= self.chars.len() {
            let keep = self.chars.len() - n;
            self.chars.truncate(keep);
        }
    }

    pub fn clear(&mut self) {
        self.chars.clear();
    }

    pub fn suffix(&self, n: usize) -> String {
        let skip = self.chars.len().saturating_sub(n);
        self.chars.iter().skip(skip).collect()
    }

    pub fn contents(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn last(&self) -> Option<char> {
        self.chars.back().copied()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Applies one key-down to the buffer and returns the character it
    /// appended, if any.
    pub fn process_key_event(&mut self, event: &KeyEvent) -> Option<char> {
        if event.is_backspace() {
            self.chars.pop_back();
            return None;
        }

        if event.is_enter() {
            self.append('\n');
            return Some('\n');
        }

        if event.resets_buffer() {
            self.clear();
            return None;
        }

        let c = event.character?;
        self.append(c);
        Some(c)
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
