//! Single-threaded `select(2)`-based multiplexer: the Transport fd, the
//! event-pipe fd, and the deferred-task deadline are all serviced from
//! one loop, matching the single-threaded reactor of the original
//! `pcie_net_run`/`main_loop` in `pcie_net.c` and `main.c`.

use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use log::{debug, warn};

use crate::bridge::OutboundQueue;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event_pipe::{EventPipe, EVK_PUSH, EVK_QUIT};
use crate::transport::{Received, Transport};

/// Drives one endpoint session to completion: peer disconnect, a fatal
/// transport error, or an `EVK_QUIT` event all end `run()` cleanly (the
/// first two return `Err`, the last returns `Ok`).
pub struct EventLoop {
    transport: Transport,
    endpoint: Endpoint,
    pipe: EventPipe,
    outbound: Option<OutboundQueue>,
}

impl EventLoop {
    pub fn new(transport: Transport, endpoint: Endpoint, pipe: EventPipe) -> Self {
        EventLoop {
            transport,
            endpoint,
            pipe,
            outbound: None,
        }
    }

    /// Wire a Bridge's outbound queue in: an `EVK_PUSH` event drains it
    /// and forwards every message to the peer over the transport.
    pub fn with_outbound_queue(mut self, outbound: OutboundQueue) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    pub fn pipe(&self) -> &EventPipe {
        &self.pipe
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            let timeout = self.endpoint.task_slot().time_until_due();
            match self.wait(timeout)? {
                Wait::Readable { transport, pipe } => {
                    if transport {
                        self.service_transport()?;
                    }
                    if pipe {
                        if self.service_pipe() {
                            return Ok(());
                        }
                    }
                }
                Wait::TimedOut => {
                    self.endpoint.task_slot().fire();
                }
            }
        }
    }

    fn service_transport(&mut self) -> Result<()> {
        match self.transport.receive_message() {
            Ok(Received::Message(msg)) => {
                debug!(
                    "recv op={:?} bar={} width={} addr={:#x}",
                    msg.op, msg.bar, msg.width, msg.addr
                );
                if let Some(reply) = self.endpoint.handle_message(&msg) {
                    self.transport.send_reply(&reply)?;
                }
                Ok(())
            }
            Ok(Received::None) => {
                warn!("dropping frame that did not decode as a known message");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Returns `true` if the loop should stop (an `EVK_QUIT` key arrived).
    fn service_pipe(&mut self) -> bool {
        for key in self.pipe.drain_keys() {
            match key {
                EVK_QUIT => return true,
                EVK_PUSH => {
                    if let Some(outbound) = &self.outbound {
                        for msg in outbound.drain() {
                            if let Err(e) = self.transport.send_message(&msg) {
                                warn!("failed to send bridged outbound message: {}", e);
                            }
                        }
                    }
                }
                other => warn!("ignoring unknown event-pipe key {}", other),
            }
        }
        false
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Wait> {
        let transport_fd = self.transport.as_raw_fd();
        let pipe_fd = self.pipe.read_fd();
        let nfds = transport_fd.max(pipe_fd) + 1;

        loop {
            let mut read_set: libc::fd_set = unsafe { mem::zeroed() };
            unsafe {
                fd_set_insert(&mut read_set, transport_fd);
                fd_set_insert(&mut read_set, pipe_fd);
            }

            let mut tv = timeout.map(|d| libc::timeval {
                tv_sec: d.as_secs() as libc::time_t,
                tv_usec: d.subsec_micros() as libc::suseconds_t,
            });
            let tv_ptr = tv
                .as_mut()
                .map(|t| t as *mut libc::timeval)
                .unwrap_or(std::ptr::null_mut());

            let rc = unsafe {
                libc::select(
                    nfds,
                    &mut read_set,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    tv_ptr,
                )
            };

            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Io(err));
            }

            if rc == 0 {
                return Ok(Wait::TimedOut);
            }

            return Ok(Wait::Readable {
                transport: unsafe { fd_set_contains(&read_set, transport_fd) },
                pipe: unsafe { fd_set_contains(&read_set, pipe_fd) },
            });
        }
    }
}

enum Wait {
    Readable { transport: bool, pipe: bool },
    TimedOut,
}

unsafe fn fd_set_insert(set: &mut libc::fd_set, fd: i32) {
    let bits = mem::size_of::<libc::c_ulong>() * 8;
    let idx = fd as usize / bits;
    let bit = fd as usize % bits;
    set.fds_bits[idx] |= 1 << bit;
}

unsafe fn fd_set_contains(set: &libc::fd_set, fd: i32) -> bool {
    let bits = mem::size_of::<libc::c_ulong>() * 8;
    let idx = fd as usize / bits;
    let bit = fd as usize % bits;
    (set.fds_bits[idx] & (1 << bit)) != 0
}
