#![feature(error_generic_member_access)]
#![deny(missing_docs)]

//! This crate defines error & result types for Arbor.
//! It also contains a variety of useful macros for error handling.

mod ext;

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{fmt, io};

pub use ext::*;

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        Self(msg.into())
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The top-level error type for Arbor.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum ArborError {
    /// An index is out of bounds.
    #[error("index {0} out of bounds from {1} to {2}\nBacktrace:\n{3}")]
    OutOfBounds(usize, usize, usize, Backtrace),
    /// An invalid argument was provided.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, Backtrace),
    /// An error occurred while decoding or encoding on-disk records.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidSerde(ErrString, Backtrace),
    /// No basket holds the requested entry.
    #[error("{0}\nBacktrace:\n{1}")]
    MissingBasket(ErrString, Backtrace),
    /// A destination is incompatible with the leaf it was bound to.
    #[error("{0}\nBacktrace:\n{1}")]
    Binding(ErrString, Backtrace),
    /// A requested entry range is invalid for the tree.
    #[error("{0}\nBacktrace:\n{1}")]
    Range(ErrString, Backtrace),
    /// A feature is not implemented.
    #[error("function {0} not implemented for {1}\nBacktrace:\n{2}")]
    NotImplemented(ErrString, ErrString, Backtrace),
    /// An assertion failed.
    #[error("{0}\nBacktrace:\n{1}")]
    AssertionFailed(ErrString, Backtrace),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, Box<ArborError>),
    /// A wrapper for IO errors.
    #[error(transparent)]
    IOError(#[from] io::Error),
    /// A wrapper for errors that cross a thread boundary.
    #[error("{0}\nBacktrace:\n{1}")]
    Shutdown(ErrString, Backtrace),
}

impl ArborError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        ArborError::Context(msg.into(), Box::new(self))
    }

    /// Returns the innermost error, skipping any context wrappers.
    pub fn root(&self) -> &ArborError {
        match self {
            ArborError::Context(_, inner) => inner.root(),
            other => other,
        }
    }

    /// Whether the root cause is a missing basket for a requested entry.
    pub fn is_missing_basket(&self) -> bool {
        matches!(self.root(), ArborError::MissingBasket(..))
    }
}

impl Debug for ArborError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<ArborError> for io::Error {
    fn from(value: ArborError) -> Self {
        match value {
            ArborError::IOError(err) => err,
            other => io::Error::other(other),
        }
    }
}

/// A type alias for Results that return ArborErrors as their error type.
pub type ArborResult<T> = Result<T, ArborError>;

/// A convenient macro for creating an ArborError.
#[macro_export]
macro_rules! arbor_err {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::ArborError::OutOfBounds($idx, $start, $stop, Backtrace::capture())
        )
    }};
    (NotImplemented: $func:expr, $by_whom:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::ArborError::NotImplemented($func.into(), format!("{}", $by_whom).into(), Backtrace::capture())
        )
    }};
    (Context: $msg:literal, $err:expr) => {{
        $crate::__private::must_use(
            $crate::ArborError::Context($msg.into(), Box::new($err))
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::ArborError::$variant(format!($fmt, $($arg),*).into(), Backtrace::capture())
        )
    }};
    ($variant:ident: $err:expr $(,)?) => {
        $crate::__private::must_use(
            $crate::ArborError::$variant($err)
        )
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::arbor_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// A convenient macro for returning an ArborError.
#[macro_export]
macro_rules! arbor_bail {
    ($($tt:tt)+) => {
        return Err($crate::arbor_err!($($tt)+))
    };
}

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[must_use]
    pub const fn must_use(x: crate::ArborError) -> crate::ArborError {
        x
    }
}
