use thiserror::Error;

/// Failures raised while decoding runtime metadata.
///
/// Everything except `Io` is recovered at entity granularity: the loader
/// that hit the failure drops (or truncates) the one record it was working
/// on and its siblings are still attempted.
#[derive(Debug, Error)]
pub enum Error {
    #[error("read of {needed} bytes at offset {offset:#x} passes the end of the image")]
    ShortRead { offset: usize, needed: usize },

    #[error("address {0:#x} is not mapped by any segment")]
    InvalidAddress(u64),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed {0} record")]
    MalformedRecord(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
