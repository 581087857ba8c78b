//! Operating-system implementations of the keyboard capabilities.

mod windows;

pub use self::windows::{WindowsInputSink, WindowsKeystrokeSource};
