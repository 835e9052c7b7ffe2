mod error;

pub use error::ErrorKind;

/// The choke `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
