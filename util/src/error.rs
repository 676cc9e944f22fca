use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("buffer too small")]
    ErrBufferTooSmall,
    #[error("marshal_to wrote {0} bytes, but expected {1}")]
    ErrMarshalSizeMismatch(usize, usize),

    #[error("{0}")]
    Other(String),
}
