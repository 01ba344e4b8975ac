use crate::{ArborError, ArborResult, ErrString};

/// Extension trait for ArborResult
pub trait ResultExt<T>: private::Sealed {
    /// Flatten a nested [`ArborResult`]. Helper function until <https://github.com/rust-lang/rust/issues/70142> is stabilized.
    fn flatten(self) -> ArborResult<T>;
}

mod private {
    use crate::ArborResult;

    pub trait Sealed {}

    impl<T> Sealed for ArborResult<ArborResult<T>> {}
}

impl<T> ResultExt<T> for ArborResult<ArborResult<T>> {
    fn flatten(self) -> ArborResult<T> {
        match self {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) | Err(e) => Err(e),
        }
    }
}

/// Attach context to the error of any result whose error converts into an [`ArborError`].
pub trait ErrorContext<T> {
    /// Wrap the error, if any, with a lazily computed context message.
    fn context<F, S>(self, msg: F) -> ArborResult<T>
    where
        F: FnOnce() -> S,
        S: Into<ErrString>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: Into<ArborError>,
{
    fn context<F, S>(self, msg: F) -> ArborResult<T>
    where
        F: FnOnce() -> S,
        S: Into<ErrString>,
    {
        self.map_err(|e| e.into().with_context(msg()))
    }
}
