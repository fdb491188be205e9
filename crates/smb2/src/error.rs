//! Client error representations.
//!
//! Every error maps onto a POSIX errno through [`Error::errno`], so callers can
//! classify failures (`is_not_found`, `is_exists`, ...) without looking at
//! NTSTATUS codes.

use {
    crate::pdu::{status, Command},
    nix::errno::Errno,
    std::{fmt, io},
    thiserror::Error,
};

/// Errno values, re-exported for matching against [`Error::errno`].
pub mod errno {
    pub use nix::errno::Errno::*;
}

/// Coarse taxonomy of failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stream I/O failure; the connection is gone.
    Transport,
    /// No common dialect or incompatible signing policy.
    Negotiation,
    /// Credentials rejected or handshake malformed.
    Auth,
    /// Signature verification failed for one message.
    Integrity,
    /// The server answered with a non-success status.
    Remote,
    /// Misuse of local state: closed handle, cancellation, bad argument.
    LocalState,
}

/// Non-success NTSTATUS returned by the server.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct RemoteStatus(pub u32);

impl fmt::Debug for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:08x})", status::name(self.0), self.0)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08x})", status::name(self.0), self.0)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The underlying stream failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The connection was torn down while the request was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// Bytes on the wire could not be decoded.
    #[error("malformed frame: {0}")]
    Framing(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// A response failed signature verification.
    #[error("signature verification failed for message {message_id}")]
    Integrity { message_id: u64 },

    #[error("server returned {status}")]
    Remote { status: RemoteStatus },

    /// The handle, share or session was closed before the call.
    #[error("use of closed {0}")]
    Closed(&'static str),

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out")]
    TimedOut,

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local failure expressed directly as an errno.
    #[error("{}", .0.desc())]
    No(Errno),

    /// An error annotated with the operation and path it happened on.
    #[error("{op} {path}: {source}")]
    Path {
        op: &'static str,
        path: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn remote(code: u32) -> Error {
        Error::Remote {
            status: RemoteStatus(code),
        }
    }

    /// Wire data that failed to decode.
    pub fn malformed(e: io::Error) -> Error {
        Error::Framing(e.to_string())
    }

    /// A well-formed response whose body does not belong to `command`.
    pub fn unexpected(command: Command) -> Error {
        Error::Framing(format!("unexpected response to {:?}", command))
    }

    /// Attach the operation and path a failure happened on.
    pub fn with_path(self, op: &'static str, path: &str) -> Error {
        Error::Path {
            op,
            path: path.to_owned(),
            source: Box::new(self),
        }
    }

    /// Strip `Path` annotations.
    pub fn root(&self) -> &Error {
        match self {
            Error::Path { source, .. } => source.root(),
            e => e,
        }
    }

    /// NTSTATUS of a remote failure.
    pub fn status(&self) -> Option<u32> {
        match self.root() {
            Error::Remote { status } => Some(status.0),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.root() {
            Error::Io(_) | Error::ConnectionLost | Error::Framing(_) => ErrorClass::Transport,
            Error::Negotiation(_) => ErrorClass::Negotiation,
            Error::Auth(_) => ErrorClass::Auth,
            Error::Integrity { .. } => ErrorClass::Integrity,
            Error::Remote { .. } => ErrorClass::Remote,
            _ => ErrorClass::LocalState,
        }
    }

    /// Get an errno representation.
    pub fn errno(&self) -> Errno {
        match *self {
            Error::Io(ref e) => errno_from_ioerror(e),
            Error::ConnectionLost => Errno::ECONNRESET,
            Error::Framing(_) => Errno::EPROTO,
            Error::Negotiation(_) => Errno::EPROTONOSUPPORT,
            Error::Auth(_) => Errno::EACCES,
            Error::Integrity { .. } => Errno::EBADMSG,
            Error::Remote { status } => errno_from_status(status.0),
            Error::Closed(_) => Errno::EBADF,
            Error::Cancelled => Errno::ECANCELED,
            Error::TimedOut => Errno::ETIMEDOUT,
            Error::Config(_) => Errno::EINVAL,
            Error::No(e) => e,
            Error::Path { ref source, .. } => source.errno(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.errno() == Errno::ENOENT
    }

    pub fn is_exists(&self) -> bool {
        self.errno() == Errno::EEXIST
    }

    pub fn is_permission(&self) -> bool {
        matches!(self.errno(), Errno::EACCES | Errno::EPERM)
    }

    /// The server cannot perform this kind of operation at all, as opposed to
    /// refusing it for this caller.
    pub fn is_unsupported(&self) -> bool {
        matches!(self.errno(), Errno::EOPNOTSUPP | Errno::ENOSYS)
    }

    pub fn is_dir(&self) -> bool {
        self.errno() == Errno::EISDIR
    }

    pub fn is_not_dir(&self) -> bool {
        self.errno() == Errno::ENOTDIR
    }
}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Error::No(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            e => io::Error::new(io::Error::from_raw_os_error(e.errno() as i32).kind(), e),
        }
    }
}

fn errno_from_ioerror(e: &io::Error) -> Errno {
    use std::io::ErrorKind::*;

    e.raw_os_error().map(Errno::from_raw).unwrap_or(match e.kind() {
        NotFound => Errno::ENOENT,
        PermissionDenied => Errno::EPERM,
        ConnectionRefused => Errno::ECONNREFUSED,
        ConnectionReset => Errno::ECONNRESET,
        ConnectionAborted => Errno::ECONNABORTED,
        NotConnected => Errno::ENOTCONN,
        AddrInUse => Errno::EADDRINUSE,
        AddrNotAvailable => Errno::EADDRNOTAVAIL,
        BrokenPipe => Errno::EPIPE,
        AlreadyExists => Errno::EEXIST,
        WouldBlock => Errno::EAGAIN,
        InvalidInput => Errno::EINVAL,
        InvalidData => Errno::EINVAL,
        TimedOut => Errno::ETIMEDOUT,
        WriteZero => Errno::EAGAIN,
        Interrupted => Errno::EINTR,
        UnexpectedEof => Errno::ECONNRESET,
        _ => Errno::EIO,
    })
}

/// Translate an NTSTATUS into the closest POSIX errno.
pub fn errno_from_status(code: u32) -> Errno {
    match code {
        status::OBJECT_NAME_NOT_FOUND
        | status::OBJECT_PATH_NOT_FOUND
        | status::NO_SUCH_FILE
        | status::BAD_NETWORK_NAME
        | status::DELETE_PENDING => Errno::ENOENT,
        status::OBJECT_NAME_COLLISION => Errno::EEXIST,
        status::ACCESS_DENIED | status::SHARING_VIOLATION => Errno::EACCES,
        status::PRIVILEGE_NOT_HELD | status::LOGON_FAILURE | status::ACCOUNT_RESTRICTION => {
            Errno::EPERM
        }
        status::NOT_SUPPORTED
        | status::INVALID_DEVICE_REQUEST
        | status::IO_REPARSE_TAG_NOT_HANDLED => Errno::EOPNOTSUPP,
        status::NOT_IMPLEMENTED => Errno::ENOSYS,
        status::FILE_IS_A_DIRECTORY => Errno::EISDIR,
        status::NOT_A_DIRECTORY => Errno::ENOTDIR,
        status::DIRECTORY_NOT_EMPTY => Errno::ENOTEMPTY,
        status::NOT_A_REPARSE_POINT
        | status::INVALID_PARAMETER
        | status::OBJECT_NAME_INVALID
        | status::OBJECT_PATH_SYNTAX_BAD => Errno::EINVAL,
        status::INVALID_HANDLE | status::FILE_CLOSED => Errno::EBADF,
        status::DISK_FULL => Errno::ENOSPC,
        status::INSUFFICIENT_RESOURCES => Errno::ENOMEM,
        status::CANCELLED => Errno::ECANCELED,
        status::STOPPED_ON_SYMLINK => Errno::ELOOP,
        status::NETWORK_NAME_DELETED
        | status::USER_SESSION_DELETED
        | status::NETWORK_SESSION_EXPIRED => Errno::ENOTCONN,
        _ => Errno::EIO,
    }
}
