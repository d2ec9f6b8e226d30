//! Bootstrap binary: wires Transport + Endpoint + EventLoop together
//! around the reference DMA device and runs it to completion. CLI
//! flags override the environment variables; unset flags fall
//! back to the env vars, unset env vars fall back to the defaults
//! documented there.

use std::net::SocketAddr;
use std::num::ParseIntError;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use pcie_endpoint::bar::BarHandler;
use pcie_endpoint::dma::Dma;
use pcie_endpoint::endpoint::Endpoint;
use pcie_endpoint::event_pipe::EventPipe;
use pcie_endpoint::transport::Transport;
use pcie_endpoint::{Error, EventLoop, Result};

#[derive(Parser, Debug)]
#[clap(about = "Reference DMA device exposed as a simulated PCIe endpoint")]
struct Args {
    #[clap(long, env = "PCIE_INET_LADDR", default_value = "127.0.0.1")]
    laddr: String,
    #[clap(long, env = "PCIE_INET_LPORT", default_value = "42425")]
    lport: u16,
    #[clap(long, env = "PCIE_INET_RADDR", default_value = "127.0.0.1")]
    raddr: String,
    #[clap(long, env = "PCIE_INET_RPORT", default_value = "42424")]
    rport: u16,

    #[clap(long, env = "PCIE_VENDOR_ID", default_value = "0x2a2a", parse(try_from_str = parse_hex_u16))]
    vendor_id: u16,
    #[clap(long, env = "PCIE_DEVICE_ID", default_value = "0x2b2b", parse(try_from_str = parse_hex_u16))]
    device_id: u16,

    /// Matches `dma::BAR0_SIZE`; overridable for probing experiments,
    /// though the DMA device only ever decodes its five registers.
    #[clap(long, env = "PCIE_BAR0_SIZE", default_value = "0x100", parse(try_from_str = parse_hex_u64))]
    bar0_size: u64,
    #[clap(long, env = "PCIE_BAR1_SIZE", default_value = "0x0", parse(try_from_str = parse_hex_u64))]
    bar1_size: u64,
    #[clap(long, env = "PCIE_BAR2_SIZE", default_value = "0x0", parse(try_from_str = parse_hex_u64))]
    bar2_size: u64,
    #[clap(long, env = "PCIE_BAR3_SIZE", default_value = "0x0", parse(try_from_str = parse_hex_u64))]
    bar3_size: u64,
    #[clap(long, env = "PCIE_BAR4_SIZE", default_value = "0x0", parse(try_from_str = parse_hex_u64))]
    bar4_size: u64,
    #[clap(long, env = "PCIE_BAR5_SIZE", default_value = "0x0", parse(try_from_str = parse_hex_u64))]
    bar5_size: u64,
}

fn parse_hex_u16(s: &str) -> std::result::Result<u16, ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x").trim_start_matches("0X"), 16)
}

fn parse_hex_u64(s: &str) -> std::result::Result<u64, ParseIntError> {
    u64::from_str_radix(s.trim_start_matches("0x").trim_start_matches("0X"), 16)
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e: std::net::AddrParseError| Error::TransportInit(e.to_string()))
}

/// A bare read/write memory window for BARs the DMA device itself
/// doesn't use, so `--bar1-size`..`--bar5-size` have somewhere to land.
struct RawBar(Vec<u8>);

impl BarHandler for RawBar {
    fn on_read(&mut self, addr: u64, out: &mut [u8]) {
        let addr = addr as usize;
        if addr + out.len() <= self.0.len() {
            out.copy_from_slice(&self.0[addr..addr + out.len()]);
        } else {
            out.fill(0xff);
        }
    }

    fn on_write(&mut self, addr: u64, data: &[u8]) {
        let addr = addr as usize;
        if addr + data.len() <= self.0.len() {
            self.0[addr..addr + data.len()].copy_from_slice(data);
        }
    }
}

fn run(args: Args) -> Result<()> {
    let local = parse_addr(&args.laddr, args.lport)?;
    let remote = parse_addr(&args.raddr, args.rport)?;

    info!("binding {} to accept peer {}", local, remote);
    let transport = Transport::open(local, remote)?;

    let mut endpoint = Endpoint::new(args.vendor_id, args.device_id, transport.sender());

    let dma = Dma::new(transport.sender(), endpoint.task_handle());
    endpoint.set_bar(0, args.bar0_size, Box::new(dma));

    for (bar, size) in [
        (1, args.bar1_size),
        (2, args.bar2_size),
        (3, args.bar3_size),
        (4, args.bar4_size),
        (5, args.bar5_size),
    ] {
        if size > 0 {
            endpoint.set_bar(bar, size, Box::new(RawBar(vec![0u8; size as usize])));
        }
    }

    let pipe = EventPipe::new().map_err(Error::Io)?;
    let mut event_loop = EventLoop::new(transport, endpoint, pipe);

    info!("event loop starting");
    event_loop.run()?;
    info!("quit event received, shutting down cleanly");
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}
