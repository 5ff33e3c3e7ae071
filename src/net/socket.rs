use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr;

use crate::error::{Error, Result};

const MAX_BACKLOG_SIZE: libc::c_int = 100;

/// A connection-oriented unix domain stream endpoint. Paths starting with
/// `@` address the abstract namespace; all descriptors carry `FD_CLOEXEC`.
///
/// The socket is the sole owner of its descriptor and closes it on drop.
#[derive(Debug)]
pub struct UnixSocket {
    fd: RawFd,
}

impl UnixSocket {
    /// Wraps an already connected descriptor.
    #[inline]
    pub(crate) fn from_fd(fd: RawFd) -> UnixSocket {
        UnixSocket { fd }
    }

    /// Creates a listener bound to `path`. A pre-existing socket file at the
    /// path is removed first; abstract names never touch the filesystem.
    pub fn open(path: &str) -> Result<UnixSocket> {
        let address = sockaddr_for(path)?;

        if !path.starts_with('@') {
            let c_path = CString::new(path).map_err(|_| Error::BadPath)?;
            unsafe { libc::unlink(c_path.as_ptr()) };
        }

        let socket = UnixSocket::create()?;

        let rc = unsafe {
            libc::bind(
                socket.fd,
                &address as *const libc::sockaddr_un as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
            )
        };
        if rc == -1 {
            return Err(last_error());
        }

        if unsafe { libc::listen(socket.fd, MAX_BACKLOG_SIZE) } == -1 {
            return Err(last_error());
        }

        Ok(socket)
    }

    /// Connects to the listener at `path`.
    pub fn connect(path: &str) -> Result<UnixSocket> {
        let address = sockaddr_for(path)?;
        let socket = UnixSocket::create()?;

        let rc = unsafe {
            libc::connect(
                socket.fd,
                &address as *const libc::sockaddr_un as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
            )
        };
        if rc == -1 {
            return Err(last_error());
        }

        Ok(socket)
    }

    /// Blocks until a peer arrives, returning the connected endpoint.
    pub fn accept(&self) -> Result<UnixSocket> {
        let fd = unsafe { libc::accept(self.fd, ptr::null_mut(), ptr::null_mut()) };
        if fd == -1 {
            return Err(last_error());
        }

        let socket = UnixSocket::from_fd(fd);
        set_cloexec(socket.fd)?;

        Ok(socket)
    }

    /// Reads exactly `buffer.len()` bytes, retrying on spurious interruption
    /// or transient unavailability.
    pub fn read(&self, buffer: &mut [u8]) -> Result<()> {
        let mut total = 0;

        while total < buffer.len() {
            let rest = &mut buffer[total..];
            let bytes =
                unsafe { libc::read(self.fd, rest.as_mut_ptr() as *mut libc::c_void, rest.len()) };

            if bytes > 0 {
                total += bytes as usize;
            } else if bytes == 0 {
                return Err(Error::PeerClosed);
            } else if !retryable(io::Error::last_os_error()) {
                return Err(last_error());
            }
        }

        Ok(())
    }

    /// Writes exactly `buffer.len()` bytes, retrying on spurious interruption
    /// or transient unavailability.
    pub fn write(&self, buffer: &[u8]) -> Result<()> {
        let mut written = 0;

        while written < buffer.len() {
            let rest = &buffer[written..];
            let bytes =
                unsafe { libc::write(self.fd, rest.as_ptr() as *const libc::c_void, rest.len()) };

            if bytes > 0 {
                written += bytes as usize;
            } else if bytes == 0 {
                return Err(Error::Transport(io::ErrorKind::WriteZero));
            } else if !retryable(io::Error::last_os_error()) {
                return Err(last_error());
            }
        }

        Ok(())
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn create() -> Result<UnixSocket> {
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if fd == -1 {
            return Err(last_error());
        }

        let socket = UnixSocket::from_fd(fd);
        set_cloexec(socket.fd)?;

        Ok(socket)
    }
}

impl AsRawFd for UnixSocket {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for UnixSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// Builds the socket address for `path`, rewriting a leading `@` to the NUL
/// byte that selects the abstract namespace.
fn sockaddr_for(path: &str) -> Result<libc::sockaddr_un> {
    let mut address: libc::sockaddr_un = unsafe { mem::zeroed() };
    address.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_bytes();
    if bytes.is_empty() || bytes.len() >= address.sun_path.len() {
        return Err(Error::BadPath);
    }

    for (slot, byte) in address.sun_path.iter_mut().zip(bytes) {
        *slot = *byte as libc::c_char;
    }

    if address.sun_path[0] == b'@' as libc::c_char {
        address.sun_path[0] = 0;
    }

    Ok(address)
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        return Err(last_error());
    }

    Ok(())
}

#[inline]
fn retryable(error: io::Error) -> bool {
    match error.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => true,
        _ => false,
    }
}

#[inline]
fn last_error() -> Error {
    io::Error::last_os_error().into()
}
