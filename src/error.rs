//! # Errors
//!
//! There are three kinds of failure in this crate and only one of them is an error value:
//! - a foundational resource failing (an OS wait returning something it never should) - [fatal], the process aborts
//! - a contract violation (double lock from the same thread, using the context before `init`) - `debug_assert!` only
//! - a configuration value we don't understand - [ConfigError]
//!
//! `try_lock` returning `None` isn't an error at all, the caller picks the retry policy.

use std::{io, panic::Location};

use thiserror::Error;

/// Print a diagnostic and abort.
///
/// A half-working lock can't be used safely by anybody => unwinding isn't an option.
#[cold]
#[track_caller]
pub fn fatal(operation: &str, err: io::Error) -> ! {
    let location = Location::caller();
    tracing::error!(
        file = location.file(),
        line = location.line(),
        error = %err,
        "error during '{operation}'"
    );
    eprintln!(
        "file {}: line {}: error '{err}' during '{operation}'",
        location.file(),
        location.line()
    );
    std::process::abort();
}

/// A configuration value couldn't be understood.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown send mode `{0}', expected one of default, wsa, none")]
    UnknownSendMode(String),
    #[error("environment variable {0} is not valid unicode")]
    NotUnicode(&'static str),
}
