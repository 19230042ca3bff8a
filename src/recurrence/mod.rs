//! Recurrence engine: rule codec, window classification and occurrence expansion.
//!
//! Everything here is pure and synchronous; the HTTP and storage layers call
//! into it but it never calls back out.

pub mod error;
pub mod expander;
pub mod rule;
pub mod window;

pub use error::RecurrenceError;
pub use expander::{compute_rule, expand_window, Occurrence};
pub use rule::Frequency;
pub use window::{Predicate, QueryWindow, WindowClassifier};
