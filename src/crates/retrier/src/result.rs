//! The `Try` result carrier
//!
//! A [`Try`] holds exactly one of a success value or an [`ExecError`]. It is
//! the terminal representation of one attempt or one whole task and is what
//! callbacks receive.

use crate::error::ExecError;

/// Success value or failure of a task
#[derive(Debug, Clone)]
pub enum Try<T> {
    /// The task produced a value
    Success(T),
    /// The task failed
    Failure(ExecError),
}

impl<T> Try<T> {
    /// Build a `Try` from a value and an optional error
    ///
    /// A present error is authoritative; the value is discarded.
    ///
    /// # Example
    ///
    /// ```rust
    /// use retrier::{ExecError, Try};
    ///
    /// let ok = Try::from_value_or_error(7, None);
    /// assert_eq!(*ok.value(), 7);
    ///
    /// let failed = Try::from_value_or_error(7, Some(ExecError::Canceled));
    /// assert!(failed.is_error());
    /// ```
    pub fn from_value_or_error(value: T, error: Option<ExecError>) -> Self {
        match error {
            Some(error) => Try::Failure(error),
            None => Try::Success(value),
        }
    }

    /// Build a successful `Try`
    pub fn success(value: T) -> Self {
        Try::Success(value)
    }

    /// Build a failed `Try`
    pub fn failure(error: ExecError) -> Self {
        Try::Failure(error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Try::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Try::Failure(_))
    }

    /// Borrow the success value
    ///
    /// # Panics
    ///
    /// Panics if this is a failure. Reading the wrong arm is a programming
    /// error.
    pub fn value(&self) -> &T {
        match self {
            Try::Success(value) => value,
            Try::Failure(error) => panic!("Try::value called on a failure: {}", error),
        }
    }

    /// Borrow the error
    ///
    /// # Panics
    ///
    /// Panics if this is a success.
    pub fn error(&self) -> &ExecError {
        match self {
            Try::Failure(error) => error,
            Try::Success(_) => panic!("Try::error called on a success"),
        }
    }

    /// Take the success value
    ///
    /// # Panics
    ///
    /// Panics if this is a failure.
    pub fn into_value(self) -> T {
        match self {
            Try::Success(value) => value,
            Try::Failure(error) => panic!("Try::into_value called on a failure: {}", error),
        }
    }

    pub fn into_result(self) -> Result<T, ExecError> {
        self.into()
    }

    /// Transform the success value, leaving failures untouched
    pub fn map<U, F>(self, f: F) -> Try<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Try::Success(value) => Try::Success(f(value)),
            Try::Failure(error) => Try::Failure(error),
        }
    }
}

impl<T> From<Result<T, ExecError>> for Try<T> {
    fn from(result: Result<T, ExecError>) -> Self {
        match result {
            Ok(value) => Try::Success(value),
            Err(error) => Try::Failure(error),
        }
    }
}

impl<T> From<Try<T>> for Result<T, ExecError> {
    fn from(value: Try<T>) -> Self {
        match value {
            Try::Success(value) => Ok(value),
            Try::Failure(error) => Err(error),
        }
    }
}
