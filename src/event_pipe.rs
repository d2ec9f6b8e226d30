//! The internal event descriptor: a self-pipe used to wake the
//! `EventLoop` for reasons other than "the socket is readable" —
//! `QUIT` to terminate, `PUSH` to drain a [`crate::bridge::OutboundQueue`].
//! Grounded in `pcie_net_add_ev`/`on_event` of the original, which use a
//! plain `pipe(2)` and `read(2)` a batch of `unsigned int` keys at once.

use std::io;
use std::os::unix::io::RawFd;

/// Terminate the event loop.
pub const EVK_QUIT: u32 = 0;
/// Drain the bridge outbound queue and send every message it holds.
pub const EVK_PUSH: u32 = 1;

/// Owns both ends of the pipe; closes them on drop.
pub struct EventPipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

/// A cheap, `Send`-able handle to the write end, for foreign threads
/// (the Bridge consumer) or other components to wake the loop with.
/// Pipe writes up to `PIPE_BUF` are atomic, so no locking is needed to
/// share this across threads.
#[derive(Clone, Copy)]
pub struct EventSignal {
    write_fd: RawFd,
}

impl EventPipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let flags = unsafe { libc::fcntl(read_fd, libc::F_GETFL) };
        if flags < 0 || unsafe { libc::fcntl(read_fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
            }
            return Err(err);
        }

        Ok(EventPipe { read_fd, write_fd })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn signal(&self) -> EventSignal {
        EventSignal {
            write_fd: self.write_fd,
        }
    }

    pub fn push(&self, key: u32) -> io::Result<()> {
        self.signal().push(key)
    }

    /// Drain every pending key, in arrival order, non-blocking.
    pub fn drain_keys(&self) -> Vec<u32> {
        let mut keys = Vec::new();
        let mut buf = [0u8; 4 * 32];
        loop {
            let n = unsafe {
                libc::read(
                    self.read_fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
            let n = n as usize;
            for chunk in buf[..n].chunks_exact(4) {
                keys.push(u32::from_ne_bytes(chunk.try_into().unwrap()));
            }
            if n < buf.len() {
                break;
            }
        }
        keys
    }
}

impl Drop for EventPipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

impl EventSignal {
    pub fn push(&self, key: u32) -> io::Result<()> {
        let bytes = key.to_ne_bytes();
        let n = unsafe {
            libc::write(
                self.write_fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
            )
        };
        if n as usize != bytes.len() {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
