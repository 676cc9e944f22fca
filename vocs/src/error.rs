use thiserror::Error;

use crate::Socket;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that end a client connection.
///
/// Protocol-level faults (bad parameters, missing permissions) are not
/// errors in this sense: they travel back to the client as error
/// responses. An `Err` from a handler tells the transport to drop the
/// socket.
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("socket is not authenticated")]
    ErrUnauthenticated,
    #[error("no media session negotiated for the socket")]
    ErrNoSession,
    #[error("media or ICE setup is not ready")]
    ErrMediaNotReady,
    #[error("event carries no usable parameter")]
    ErrParameter,
    #[error("collaborator refused the request")]
    ErrProcessing,
    #[error("failed to send to socket {0}")]
    ErrSendFailed(Socket),
    #[error("async request table refused uuid {0}")]
    ErrAsyncRegister(String),

    #[error("{0}")]
    Other(String),
}
