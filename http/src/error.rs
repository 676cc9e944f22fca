use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("not a valid IMF fixdate")]
    ErrInvalidDate,
    #[error("header name is not a token")]
    ErrInvalidHeaderName,
    #[error("status code out of range")]
    ErrInvalidStatusCode,
    #[error("method name exceeds the configured limit")]
    ErrMethodTooLong,

    #[error("{0}")]
    Other(String),
}
