//! Utility functions for common operations.
//!
//! - **Text processing**: stripping terminal control sequences from feed text
//!
//! # Examples
//!
//! ```
//! use feedpipe::util::strip_control_chars;
//!
//! assert_eq!(strip_control_chars("Evil\x1b[31m Feed"), "Evil Feed");
//! ```

mod text;

pub use text::strip_control_chars;
