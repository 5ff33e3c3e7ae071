use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Error {
    /// Socket path malformed or too long for the address family.
    BadPath,
    /// Unrecoverable failure of an underlying socket call.
    Transport(io::ErrorKind),
    /// Remote end closed the stream mid-frame.
    PeerClosed,
    /// Archive exhausted during unpack.
    ShortRead,
    /// Payload bytes do not form a value of the requested type.
    BadEncoding,
    /// A descriptor was registered on the loop twice.
    AlreadyRegistered,
    /// No functor registered under the requested signature.
    UnknownMethod,
    /// A functor was bound to an unusable target.
    BadBinding,
    /// Public API precondition violated by the caller.
    InvalidArgument,
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::UnexpectedEof => Error::PeerClosed,
            kind => Error::Transport(kind),
        }
    }
}
