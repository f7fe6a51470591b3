//! Error types and error handling strategy for coopsync.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Suspension is never an error: a full channel or an unfired name simply
//!   parks the caller until a complementary call arrives
//! - Contract violations are reported to the caller instead of being masked
//! - A failure stored in a [`Deferred`](crate::deferred::Deferred) propagates to
//!   every task awaiting it, as if raised at the await point
//!
//! # Error Categories
//!
//! - **Contract**: misuse of a primitive (double resolve, displaced waiter)
//! - **Race**: race combinator aggregate failures
//! - **Registry**: named wait/fire failures
//! - **Runtime**: executor could not drive a future to completion
//! - **Config**: invalid configuration values
//! - **User**: failures raised by application code

use core::fmt;
use std::sync::Arc;

use crate::types::TaskId;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Contract violations ===
    /// A deferred value was resolved more than once.
    AlreadyResolved,
    /// The value of a deferred was already moved out by another awaiter.
    AlreadyTaken,
    /// A blocked waiter was displaced by a second concurrent blocker.
    WaiterDisplaced,

    // === Race ===
    /// Every branch of a race failed; nothing can win anymore.
    AllBranchesFailed,
    /// A timer won the race against the guarded operation.
    TimedOut,

    // === Registry ===
    /// A registry value was fired with a different type than the waiter expected.
    TypeMismatch,
    /// A registry entry was evicted before it was fired.
    Evicted,

    // === Runtime ===
    /// The awaited future can never complete: no task is ready and no timer is armed.
    Deadlock,
    /// The configured step limit was reached.
    StepLimit,

    // === Configuration ===
    /// Invalid configuration value.
    Config,

    // === Internal / user ===
    /// Internal error (bug).
    Internal,
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadyResolved | Self::AlreadyTaken | Self::WaiterDisplaced => {
                ErrorCategory::Contract
            }
            Self::AllBranchesFailed | Self::TimedOut => ErrorCategory::Race,
            Self::TypeMismatch | Self::Evicted => ErrorCategory::Registry,
            Self::Deadlock | Self::StepLimit => ErrorCategory::Runtime,
            Self::Config => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns true if the error signals misuse of a primitive rather than a
    /// failure of the work itself.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self.category(), ErrorCategory::Contract)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Misuse of a synchronization primitive.
    Contract,
    /// Race combinator outcomes.
    Race,
    /// Named wait/fire registry.
    Registry,
    /// Executor failures.
    Runtime,
    /// Configuration failures.
    Config,
    /// Internal errors.
    Internal,
    /// User-originated errors.
    User,
}

/// The main error type for coopsync operations.
///
/// `Error` is cheap to clone so that one failure can be delivered to every
/// waiter of a broadcast [`Deferred`](crate::deferred::Deferred).
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    task_id: Option<TaskId>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            task_id: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Records the task in which the failure originated.
    #[must_use]
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the originating task, if recorded.
    #[must_use]
    pub const fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    /// Returns true if this error is a contract violation.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        self.kind.is_contract_violation()
    }

    /// Returns true if a timer won the race.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TimedOut)
    }

    /// Creates a user error carrying a message.
    #[must_use]
    pub fn user(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(detail)
    }

    /// Creates an internal error (bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Creates a double-resolve contract violation.
    #[must_use]
    pub fn already_resolved() -> Self {
        Self::new(ErrorKind::AlreadyResolved).with_message("deferred resolved more than once")
    }

    /// Creates the error delivered to a waiter pushed out of its slot.
    #[must_use]
    pub fn waiter_displaced(direction: &str) -> Self {
        Self::new(ErrorKind::WaiterDisplaced).with_message(format!(
            "blocked {direction} displaced by a second concurrent {direction}"
        ))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<crate::runtime::config::ConfigError> for Error {
    fn from(e: crate::runtime::config::ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(e.to_string())
            .with_source(e)
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for coopsync operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_message() {
        let err = Error::new(ErrorKind::TimedOut).with_message("timer fired first");
        assert_eq!(err.to_string(), "TimedOut: timer fired first");
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::user("outer").with_source(Underlying);
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn categories_group_kinds() {
        assert_eq!(ErrorKind::AlreadyResolved.category(), ErrorCategory::Contract);
        assert_eq!(ErrorKind::WaiterDisplaced.category(), ErrorCategory::Contract);
        assert_eq!(ErrorKind::AllBranchesFailed.category(), ErrorCategory::Race);
        assert_eq!(ErrorKind::Evicted.category(), ErrorCategory::Registry);
        assert_eq!(ErrorKind::Deadlock.category(), ErrorCategory::Runtime);
        assert!(ErrorKind::AlreadyTaken.is_contract_violation());
        assert!(!ErrorKind::User.is_contract_violation());
    }

    #[test]
    fn clones_share_source() {
        let err = Error::user("boom").with_source(Underlying);
        let copy = err.clone();
        assert_eq!(copy.kind(), ErrorKind::User);
        assert_eq!(copy.message(), Some("boom"));
        assert!(copy.source().is_some());
    }

    #[test]
    fn result_ext_adds_message() {
        let res: Result<()> = Err(Error::new(ErrorKind::Evicted));
        let err = res.context("name dropped").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::Evicted);
        assert_eq!(err.to_string(), "Evicted: name dropped");
    }

    #[test]
    fn task_id_is_recorded() {
        let err = Error::user("x").with_task(TaskId::new_for_test(7));
        assert_eq!(err.task_id(), Some(TaskId::new_for_test(7)));
    }
}
