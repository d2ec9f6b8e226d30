//! Owns PCI-visible state (configuration space, BAR table, deferred
//! task slot) and routes every inbound [`Message`] to the right
//! handler, producing a [`Reply`] for the ops that need one.
//!
//! Grounded in `on_msg_recv`/`on_write_config`/`on_read_config` of the
//! original `pcie.c`.

use std::time::Duration;

use log::warn;

use crate::bar::{BarHandler, BarTable, BAR_COUNT};
use crate::deferred::{TaskHandle, TaskSlot};
use crate::pci_config::{self, ConfigSpace};
use crate::transport::Sender;
use crate::wire::{Message, Op, Reply};

pub struct Endpoint {
    config: ConfigSpace,
    bars: BarTable,
    tasks: TaskSlot,
    sender: Sender,
}

impl Endpoint {
    pub fn new(vendor_id: u16, device_id: u16, sender: Sender) -> Self {
        Endpoint {
            config: ConfigSpace::new(vendor_id, device_id),
            bars: BarTable::new(),
            tasks: TaskSlot::new(),
            sender,
        }
    }

    /// Register `handler` as BAR `bar`'s backing store. `size` must be
    /// a power of two; `size == 0` deactivates the BAR.
    pub fn set_bar(&mut self, bar: usize, size: u64, handler: Box<dyn BarHandler + Send>) {
        self.bars.set(bar, size, handler);
    }

    /// A clone of the serialized sender, for device logic (e.g. the DMA
    /// reference device) that needs to push outbound messages from a
    /// deferred-task callback.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    pub fn schedule(&mut self, delay: Duration, callback: impl FnOnce() + Send + 'static) {
        self.tasks.schedule(delay, Box::new(callback));
    }

    pub fn task_slot(&mut self) -> &mut TaskSlot {
        &mut self.tasks
    }

    /// A cloneable handle onto the deferred-task slot, for device logic
    /// (e.g. the DMA reference device) that needs to schedule its own
    /// completion callback from inside a [`BarHandler`] impl.
    pub fn task_handle(&self) -> TaskHandle {
        self.tasks.handle()
    }

    pub fn send_msi(&self) -> std::io::Result<()> {
        self.sender.send_message(&Message::msi())
    }

    /// Route one inbound message. Returns the reply to send back, if
    /// any (exactly one reply for every op in the read set, none
    /// otherwise).
    pub fn handle_message(&mut self, msg: &Message) -> Option<Reply> {
        match msg.op {
            Op::ReadConfig => {
                let value = self.config.read(msg.addr, msg.width);
                Some(Reply::ok(value.to_le_bytes()))
            }
            Op::WriteConfig => {
                self.write_config(msg.addr, msg.width, le_bytes_to_u64(&msg.data));
                None
            }
            Op::ReadMem => Some(Reply::ok(self.read_mem(msg.bar, msg.addr, msg.width))),
            Op::WriteMem => {
                self.write_mem(msg.bar, msg.addr, &msg.data);
                None
            }
            Op::ReadIo => Some(Reply::all_ones()),
            Op::WriteIo => None,
            // These are device-to-host notifications; a peer sending
            // one back at us has nothing for the Endpoint to do.
            Op::Int | Op::Msi | Op::Msix => {
                warn!("ignoring device-to-host op {:?} received from peer", msg.op);
                None
            }
        }
    }

    fn write_config(&mut self, addr: u64, width: u8, value: u64) {
        if addr == pci_config::ROM_ADDRESS {
            // ROM BAR is read-only in this simulation.
            return;
        }

        if let Some(bar) = pci_config::bar_index(addr) {
            let size = self.bars.size(bar);
            if size == 0 {
                return;
            }
            let bar_reg_addr = pci_config::BASE_ADDRESS_0 + (bar as u64) * 4;
            let mask = !(size.wrapping_sub(1)) as u32;
            let masked = (value as u32) & mask;
            self.config.write_bar_register(bar_reg_addr, masked);
            return;
        }

        self.config.write(addr, width, value);
    }

    fn read_mem(&mut self, bar: u8, addr: u64, width: u8) -> [u8; 8] {
        let width = (width as usize).min(8);
        let bar = bar as usize;
        if bar >= BAR_COUNT || !self.bars.is_active(bar) {
            return [0xff; 8];
        }
        let mut buf = vec![0u8; width];
        self.bars.read(bar, addr, &mut buf);
        let mut out = [0u8; 8];
        out[..width].copy_from_slice(&buf);
        out
    }

    fn write_mem(&mut self, bar: u8, addr: u64, data: &[u8]) {
        let bar = bar as usize;
        if bar >= BAR_COUNT || !self.bars.is_active(bar) {
            return;
        }
        self.bars.write(bar, addr, data);
    }
}

fn le_bytes_to_u64(data: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = data.len().min(8);
    buf[..n].copy_from_slice(&data[..n]);
    u64::from_le_bytes(buf)
}
