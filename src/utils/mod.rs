/*!
 * Utilities Module
 *
 * Contains utility functions for error handling, time conversion,
 * settings merging, and LIFF token management.
 */

pub mod errors;
pub mod liff;
pub mod merge;
pub mod time;

pub use errors::{AppError, ConflictKind, PolicyRule, Result};
pub use merge::deep_merge;
