/*!
A simulated PCIe endpoint runtime: a device process exposes configuration
space, BARs and MSI over a plain TCP transport to a root-complex peer,
without modeling PCIe's electrical or link-layer behavior. The wire
protocol is a handful of fixed-width little-endian messages — read/write
config, read/write memory, read/write I/O, and device-to-host
notifications (INT/MSI/MSI-X) — framed behind a 2-byte length prefix.

# Core components

* [`transport`] — the frame-delimited TCP carrier. One serialized
  [`transport::Sender`] is shared by every component that needs to write
  to the peer: reply path, MSI notifications, deferred-task bulk writes,
  and a bridged foreign thread's outbound queue.
* [`wire`] — the `Message`/`Reply` wire types and their `encode`/`decode`
  functions.
* [`pci_config`] — the 4 KiB configuration-space byte array, pre-populated
  with a standard PCI header and a single MSI capability record.
* [`bar`] — the six-slot BAR table, each slot backed by a [`bar::BarHandler`]
  capability object instead of the raw function-pointer-plus-context
  pattern real hardware models tend to reach for.
* [`deferred`] — a single-entry deferred-task slot driving the one piece
  of asynchronous device behavior this runtime needs (the DMA reference
  device's simulated transfer latency).
* [`endpoint`] — owns configuration space, the BAR table and the
  deferred-task slot, and routes every inbound [`wire::Message`] to the
  right handler.
* [`event_loop`] / [`event_pipe`] — the single-threaded `select(2)`
  reactor driving it all: the transport fd, an internal self-pipe for
  out-of-band wakeups, and the pending deferred task's deadline.
* [`bridge`] — cross-thread glue so a foreign simulation thread can
  answer BAR reads and push outbound writes/MSIs without touching the
  socket directly.
* [`dma`] — a reference DMA device built on top of the runtime to
  exercise it end-to-end: a handful of BAR0 registers, an internal
  byte-pattern BRAM, and a deferred bulk transfer on completion of which
  it raises an MSI.

Everything above runs on one thread (the EventLoop's); the only place
concurrency shows up is the optional Bridge, and even there the
synchronization is a channel rendezvous rather than shared mutable
state guarded by ad-hoc locking.
*/

pub mod bar;
pub mod bridge;
pub mod deferred;
pub mod dma;
pub mod endpoint;
pub mod error;
pub mod event_loop;
pub mod event_pipe;
pub mod pci_config;
pub mod transport;
pub mod wire;

pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use event_loop::EventLoop;
pub use event_pipe::EventPipe;
pub use transport::Transport;
