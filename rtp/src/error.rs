use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("frame too short to carry an RTP header")]
    ErrFrameTooShort,
    #[error("CSRC count exceeds {}", crate::frame::MAX_CSRC_COUNT)]
    ErrTooManyCsrcs,
    #[error("extension length must be a multiple of 4 octets")]
    ErrExtensionNotAligned,
    #[error("declared extension length overruns the frame")]
    ErrExtensionOverrun,
    #[error("padding exceeds {} octets", crate::frame::MAX_PADDING_LENGTH)]
    ErrPaddingTooLarge,
    #[error("padding present without the padding bit set")]
    ErrPaddingWithoutBit,
    #[error("padding length octet is zero or overruns the payload")]
    ErrPaddingLengthInvalid,
    #[error("buffer too small")]
    ErrBufferTooSmall,
    #[error("stream buffer must hold at least one frame")]
    ErrZeroCapacity,

    #[error("{0}")]
    Util(#[from] util::Error),
}

impl From<Error> for util::Error {
    fn from(e: Error) -> Self {
        util::Error::Other(e.to_string())
    }
}
