use thiserror::Error;

use crate::stream::MethodKey;

macro_rules! format_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Format {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Format {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into three groups, mirroring how the devirtualization pipeline treats
/// failures:
///
/// ## Per-method errors (isolated, the batch continues)
/// - [`Error::Format`] - A malformed or truncated resource, stream or operand
/// - [`Error::OutOfBounds`] - A read past the end of a buffer
/// - [`Error::MethodFailed`] - A cached failure for a method that already failed to decode
///
/// ## Pipeline invariant violations (fatal, the run aborts)
/// - [`Error::CacheInvariantViolation`] - Two decodes of one method disagreed
///
/// ## Setup errors
/// - [`Error::Empty`], [`Error::UnsupportedVersion`], [`Error::FileError`],
///   [`Error::ThreadPool`], [`Error::Error`]
///
/// # Examples
///
/// ```rust,no_run
/// use vmscope::{Error, stream::Resource};
///
/// match Resource::from_file("resource.bin") {
///     Ok(_) => println!("Loaded resource"),
///     Err(Error::Format { message, file, line }) => {
///         eprintln!("Malformed resource: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The resource or an instruction stream is damaged and could not be parsed.
    ///
    /// Covers truncated streams, invalid length prefixes, checksum mismatches and
    /// operand shapes that contradict the remaining stream length. The error includes
    /// the source location where the problem was detected.
    #[error("Format - {file}:{line}: {message}")]
    Format {
        /// The message to be printed for the Format error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// The resource declares a layout version this crate does not know how to decode.
    #[error("Unsupported resource format version - {0}")]
    UnsupportedVersion(u16),

    /// The method failed to decode earlier in this run.
    ///
    /// Failures are cached like successes, every later lookup of the same key
    /// returns this error without decoding again.
    #[error("Method {key} failed to decode - {message}")]
    MethodFailed {
        /// The method whose decode failed
        key: MethodKey,
        /// The original failure, rendered
        message: String,
    },

    /// Two decode attempts for the same method produced different results.
    ///
    /// This signals a non-determinism bug; every downstream assumption about the
    /// cache breaks, so the run is aborted.
    #[error("Cache invariant violated for method {key} - {message}")]
    CacheInvariantViolation {
        /// The method whose cached result diverged
        key: MethodKey,
        /// Description of the divergence
        message: String,
    },

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The worker pool could not be constructed.
    #[error("{0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns `true` for errors that describe malformed input of a single item.
    ///
    /// These are isolated to the offending method; the rest of the batch continues.
    #[must_use]
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            Error::Format { .. } | Error::OutOfBounds { .. } | Error::MethodFailed { .. }
        )
    }

    /// Returns `true` for errors that must abort the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CacheInvariantViolation { .. })
    }
}
