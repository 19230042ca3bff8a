//! Database models.

pub mod calendar_entry;

pub use self::calendar_entry::*;
