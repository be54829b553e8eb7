//! Command handlers grouped by concern.

pub(crate) mod callback;
pub(crate) mod login;
pub(crate) mod operations;
pub(crate) mod progress;
pub(crate) mod scheduler;
