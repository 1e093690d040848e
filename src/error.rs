use thiserror::Error;

/// Errors raised while configuring or clearing a memoized function.
///
/// Failures of the memoized callable itself never show up here: they are
/// returned to the caller unchanged through `try_call`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoizeError {
    /// `max_age` was negative
    #[error("the `max_age` option should not be negative, got {0} ms")]
    NegativeMaxAge(i64),

    /// `max_age` exceeds the largest delay a timer can be scheduled for
    #[error("the `max_age` option cannot exceed 2147483647 ms, got {0} ms")]
    MaxAgeTooLarge(i64),

    /// `memoize_clear` was given a function that has no registered cache
    #[error("can't clear `{0}`: the function was not memoized")]
    NotMemoized(String),

    /// The registered cache does not support `clear`
    #[error("can't clear `{0}`: its cache storage does not support clearing")]
    NotClearable(String),
}

impl MemoizeError {
    /// True for errors raised while building a memoized function.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NegativeMaxAge(_) | Self::MaxAgeTooLarge(_))
    }

    /// True for errors raised by `memoize_clear`.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::NotMemoized(_) | Self::NotClearable(_))
    }
}
