//! Low-level file and clock helpers shared by the Parley crates.
//!
//! Chat records are written with [`write_text_atomic`] so a crash mid-write
//! leaves either the previous or the next record on disk. Cycle reports go
//! through [`append_line_with_rotation`].

pub mod atomic_io;
pub mod log_rotation;
pub mod time_utils;

pub use atomic_io::{read_text_if_exists, write_text_atomic};
pub use log_rotation::{append_line_with_rotation, LogRotationPolicy};
pub use time_utils::{current_unix_timestamp_ms, duration_to_millis};
