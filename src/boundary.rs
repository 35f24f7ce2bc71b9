//! Top-level error boundary
//!
//! [`ErrorBoundary::run`] wraps the outermost action of a program. When the
//! action fails, the database connection is closed so no transaction stays
//! open, and the error is handed to every registered [`ErrorSink`] before
//! being returned to the caller.

use anyhow::Error;
use tracing::{error, warn};

use crate::database::Database;

/// Receiver of errors that escaped to the boundary
pub trait ErrorSink {
    fn report(&self, err: &Error);
}

impl<F> ErrorSink for F
where
    F: Fn(&Error),
{
    fn report(&self, err: &Error) {
        self(err)
    }
}

/// Prints the error and its causes to standard error
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl ErrorSink for StderrSink {
    fn report(&self, err: &Error) {
        eprintln!("Error: {}", err);
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {}", cause);
        }
    }
}

/// Emits the error as a `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, err: &Error) {
        error!("{:#}", err);
    }
}

#[derive(Default)]
pub struct ErrorBoundary<'a> {
    sinks: Vec<Box<dyn ErrorSink + 'a>>,
    database: Option<&'a Database>,
}

impl<'a> ErrorBoundary<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl ErrorSink + 'a) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Close this database's connection when an action fails
    pub fn closing(mut self, database: &'a Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Run `f`, reporting and returning its error if it fails
    pub fn run<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        f().inspect_err(|err| self.handle(err))
    }

    fn handle(&self, err: &Error) {
        if let Some(database) = self.database {
            if let Err(close_err) = database.close() {
                warn!("failed to close database: {}", close_err);
            }
        }
        for sink in &self.sinks {
            sink.report(err);
        }
    }
}
