//! End-to-end scenarios driving the full Transport + Endpoint +
//! EventLoop stack over a real loopback TCP socket, covering the
//! concrete end-to-end scenarios.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use pcie_endpoint::bar::BarHandler;
use pcie_endpoint::bridge::{channel, BridgeBar};
use pcie_endpoint::dma::Dma;
use pcie_endpoint::endpoint::Endpoint;
use pcie_endpoint::event_pipe::EventPipe;
use pcie_endpoint::pci_config;
use pcie_endpoint::transport::Transport;
use pcie_endpoint::wire::{Message, Op, Reply};
use pcie_endpoint::EventLoop;

/// Bind an ephemeral port, hand back the still-unconnected listener and
/// its address so the caller can spawn the server side and connect a
/// client in either order.
fn bind_ephemeral() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).unwrap();
    let size = u16::from_le_bytes(header) as usize;
    let mut body = vec![0u8; size - 2];
    stream.read_exact(&mut body).unwrap();
    body
}

fn send_message(stream: &mut TcpStream, msg: &Message) {
    stream.write_all(&msg.encode()).unwrap();
}

#[test]
fn vendor_device_id_probe() {
    let (listener, addr) = bind_ephemeral();
    let client_thread = thread::spawn(move || TcpStream::connect(addr).unwrap());
    let transport = Transport::from_listener(listener).unwrap();
    let mut client = client_thread.join().unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let endpoint = Endpoint::new(0x2a2a, 0x2b2b, transport.sender());
    let pipe = EventPipe::new().unwrap();
    let signal = pipe.signal();
    let mut ev = EventLoop::new(transport, endpoint, pipe);
    let server = thread::spawn(move || ev.run());

    send_message(&mut client, &Message::new(Op::ReadConfig, 0, 2, 0, vec![]));
    let r1 = Reply::decode(&read_frame(&mut client)).unwrap();
    assert_eq!(&r1.data[0..2], &[0x2a, 0x2a]);

    send_message(&mut client, &Message::new(Op::ReadConfig, 0, 2, 2, vec![]));
    let r2 = Reply::decode(&read_frame(&mut client)).unwrap();
    assert_eq!(&r2.data[0..2], &[0x2b, 0x2b]);

    signal.push(pcie_endpoint::event_pipe::EVK_QUIT).unwrap();
    server.join().unwrap().unwrap();
}

struct NullBar;
impl BarHandler for NullBar {
    fn on_read(&mut self, _addr: u64, out: &mut [u8]) {
        out.fill(0);
    }
    fn on_write(&mut self, _addr: u64, _data: &[u8]) {}
}

#[test]
fn bar_size_probe() {
    let (listener, addr) = bind_ephemeral();
    let client_thread = thread::spawn(move || TcpStream::connect(addr).unwrap());
    let transport = Transport::from_listener(listener).unwrap();
    let mut client = client_thread.join().unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let mut endpoint = Endpoint::new(0, 0, transport.sender());
    endpoint.set_bar(0, 0x100, Box::new(NullBar));
    let pipe = EventPipe::new().unwrap();
    let signal = pipe.signal();
    let mut ev = EventLoop::new(transport, endpoint, pipe);
    let server = thread::spawn(move || ev.run());

    send_message(
        &mut client,
        &Message::new(
            Op::WriteConfig,
            0,
            4,
            pci_config::BASE_ADDRESS_0,
            0xFFFF_FFFFu32.to_le_bytes().to_vec(),
        ),
    );
    send_message(
        &mut client,
        &Message::new(Op::ReadConfig, 0, 4, pci_config::BASE_ADDRESS_0, vec![]),
    );
    let reply = Reply::decode(&read_frame(&mut client)).unwrap();
    assert_eq!(&reply.data[0..4], &[0x00, 0xff, 0xff, 0xff]);

    signal.push(pcie_endpoint::event_pipe::EVK_QUIT).unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn dma_completion() {
    let (listener, addr) = bind_ephemeral();
    let client_thread = thread::spawn(move || TcpStream::connect(addr).unwrap());
    let transport = Transport::from_listener(listener).unwrap();
    let mut client = client_thread.join().unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let mut endpoint = Endpoint::new(0, 0, transport.sender());
    let dma = Dma::new(transport.sender(), endpoint.task_handle());
    endpoint.set_bar(0, 0x100, Box::new(dma));
    let pipe = EventPipe::new().unwrap();
    let signal = pipe.signal();
    let mut ev = EventLoop::new(transport, endpoint, pipe);
    let server = thread::spawn(move || ev.run());

    // ADL=0x1000, ADH=0x0, BAZ=0x03, CTL=(1<<31)|(1<<30)|0x8000
    send_message(
        &mut client,
        &Message::new(Op::WriteMem, 0, 4, 0x08, 0x1000u32.to_le_bytes().to_vec()),
    );
    send_message(
        &mut client,
        &Message::new(Op::WriteMem, 0, 4, 0x0c, 0u32.to_le_bytes().to_vec()),
    );
    send_message(
        &mut client,
        &Message::new(Op::WriteMem, 0, 4, 0x10, 0x03u32.to_le_bytes().to_vec()),
    );
    let ctl: u32 = (1 << 31) | (1 << 30) | 0x8000;
    send_message(
        &mut client,
        &Message::new(Op::WriteMem, 0, 4, 0x00, ctl.to_le_bytes().to_vec()),
    );

    for block in 0..8u64 {
        let msg = Message::decode(&read_frame(&mut client)).unwrap();
        assert_eq!(msg.op, Op::WriteMem);
        assert_eq!(msg.addr, 0x1000 + block * 4096);
        assert_eq!(msg.data.len(), 4096);
        for (j, byte) in msg.data.iter().enumerate() {
            let i = (block * 4096 + j as u64) as u8;
            assert_eq!(*byte, i.wrapping_add(3));
        }
    }

    let msi = Message::decode(&read_frame(&mut client)).unwrap();
    assert_eq!(msi.op, Op::Msi);

    send_message(&mut client, &Message::new(Op::ReadMem, 0, 4, 0x04, vec![]));
    let reply = Reply::decode(&read_frame(&mut client)).unwrap();
    assert_eq!(&reply.data[0..4], &[0x00, 0x80, 0x00, 0x80]);

    signal.push(pcie_endpoint::event_pipe::EVK_QUIT).unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn unknown_op_tolerance() {
    let (listener, addr) = bind_ephemeral();
    let client_thread = thread::spawn(move || TcpStream::connect(addr).unwrap());
    let transport = Transport::from_listener(listener).unwrap();
    let mut client = client_thread.join().unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let endpoint = Endpoint::new(0x2a2a, 0, transport.sender());
    let pipe = EventPipe::new().unwrap();
    let signal = pipe.signal();
    let mut ev = EventLoop::new(transport, endpoint, pipe);
    let server = thread::spawn(move || ev.run());

    // A raw frame whose op byte (0xFE) is not in the enumerated set.
    let mut bad_frame = Vec::new();
    let body_len = 1 + 1 + 1 + 8 + 2;
    bad_frame.extend_from_slice(&((2 + body_len) as u16).to_le_bytes());
    bad_frame.push(0xFE);
    bad_frame.push(0);
    bad_frame.push(0);
    bad_frame.extend_from_slice(&0u64.to_le_bytes());
    bad_frame.extend_from_slice(&0u16.to_le_bytes());
    client.write_all(&bad_frame).unwrap();

    send_message(&mut client, &Message::new(Op::ReadConfig, 0, 2, 0, vec![]));
    let reply = Reply::decode(&read_frame(&mut client)).unwrap();
    assert_eq!(&reply.data[0..2], &[0x2a, 0x2a]);

    signal.push(pcie_endpoint::event_pipe::EVK_QUIT).unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn bridge_round_trip() {
    let (listener, addr) = bind_ephemeral();
    let client_thread = thread::spawn(move || TcpStream::connect(addr).unwrap());
    let transport = Transport::from_listener(listener).unwrap();
    let mut client = client_thread.join().unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let mut endpoint = Endpoint::new(0, 0, transport.sender());
    let (front, back, outbound) = channel();
    endpoint.set_bar(0, 0x100, Box::new(BridgeBar::new(0, front)));
    let pipe = EventPipe::new().unwrap();
    let signal = pipe.signal();
    let mut ev = EventLoop::new(transport, endpoint, pipe).with_outbound_queue(outbound);
    let server = thread::spawn(move || ev.run());

    let foreign = thread::spawn(move || {
        if let Some(pcie_endpoint::bridge::Access::Read { reply, .. }) = back.recv() {
            reply.send(0xDEADBEEFu32.to_le_bytes().to_vec()).unwrap();
        }
    });

    send_message(&mut client, &Message::new(Op::ReadMem, 0, 4, 0, vec![]));
    let reply = Reply::decode(&read_frame(&mut client)).unwrap();
    assert_eq!(&reply.data[0..4], &0xDEADBEEFu32.to_le_bytes());

    foreign.join().unwrap();
    signal.push(pcie_endpoint::event_pipe::EVK_QUIT).unwrap();
    server.join().unwrap().unwrap();
}

#[test]
fn graceful_quit() {
    let (listener, addr) = bind_ephemeral();
    let client_thread = thread::spawn(move || TcpStream::connect(addr).unwrap());
    let transport = Transport::from_listener(listener).unwrap();
    let _client = client_thread.join().unwrap();

    let endpoint = Endpoint::new(0, 0, transport.sender());
    let pipe = EventPipe::new().unwrap();
    let signal = pipe.signal();
    let mut ev = EventLoop::new(transport, endpoint, pipe);

    signal.push(pcie_endpoint::event_pipe::EVK_QUIT).unwrap();
    let result = ev.run();
    assert!(result.is_ok());
}
