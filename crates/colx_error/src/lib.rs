use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

pub type Result<T, E = ColxError> = std::result::Result<T, E>;

/// Helper macro for returning an error for functionality that's reserved by
/// the interchange format but not implemented.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)+) => {{
        let msg = format!($($arg)+);
        return Err($crate::ColxError::new(format!("Not yet implemented: {msg}")));
    }};
}

#[derive(Debug)]
pub struct ColxError {
    inner: Box<ColxErrorInner>,
}

#[derive(Debug)]
struct ColxErrorInner {
    /// Message for the error.
    msg: String,

    /// Source of the error.
    source: Option<Box<dyn Error + Send + Sync>>,

    /// Captured backtrace.
    ///
    /// Only captured if RUST_BACKTRACE (or RUST_LIB_BACKTRACE) is set.
    backtrace: Backtrace,
}

impl ColxError {
    pub fn new(msg: impl Into<String>) -> Self {
        ColxError {
            inner: Box::new(ColxErrorInner {
                msg: msg.into(),
                source: None,
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        ColxError {
            inner: Box::new(ColxErrorInner {
                msg: msg.into(),
                source: Some(source),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn get_msg(&self) -> &str {
        self.inner.msg.as_str()
    }

    pub fn get_backtrace(&self) -> Option<&Backtrace> {
        match self.inner.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.inner.backtrace),
            _ => None,
        }
    }

    /// Walk the source chain looking for an error of type `T`.
    ///
    /// Nested `ColxError`s are descended into as well.
    pub fn downcast_source<T: Error + 'static>(&self) -> Option<&T> {
        let mut curr: Option<&(dyn Error + 'static)> = match &self.inner.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        };

        while let Some(err) = curr {
            if let Some(found) = err.downcast_ref::<T>() {
                return Some(found);
            }
            curr = err.source();
        }

        None
    }
}

impl From<fmt::Error> for ColxError {
    fn from(value: fmt::Error) -> Self {
        Self::with_source("Format error", Box::new(value))
    }
}

impl From<std::io::Error> for ColxError {
    fn from(value: std::io::Error) -> Self {
        Self::with_source("IO error", Box::new(value))
    }
}

impl From<std::ffi::NulError> for ColxError {
    fn from(value: std::ffi::NulError) -> Self {
        Self::with_source("String contains interior nul byte", Box::new(value))
    }
}

impl From<std::str::Utf8Error> for ColxError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::with_source("String not valid utf8", Box::new(value))
    }
}

impl fmt::Display for ColxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {}", source)?;
        }

        if let Some(bt) = self.get_backtrace() {
            write!(f, "\nBacktrace: {bt}")?
        }

        Ok(())
    }
}

impl Error for ColxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// An extension trait for adding context to the Error variant of a result.
pub trait ResultExt<T, E> {
    /// Wrap an error with a static context string.
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(ColxError::with_source(msg, Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an error if the option is None.
    fn required(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(ColxError::new(msg)),
        }
    }
}
