//! The BAR table: six memory windows, each optionally backed by a
//! [`BarHandler`] capability object. Generalizes the original's
//! function-pointer-plus-opaque-context pattern (`pcie_readfn_t` /
//! `pcie_writefn_t` / `void*`) into a trait object, per the Design
//! Notes' "opaque + callback" guidance.

pub const BAR_COUNT: usize = 6;

/// Device-side behavior backing one active BAR.
///
/// `on_read` must fill exactly `out.len()` bytes; `on_write` receives
/// exactly the write's payload. Both are invoked from the `EventLoop`
/// thread only unless routed through the [`crate::bridge`] module.
pub trait BarHandler {
    fn on_read(&mut self, addr: u64, out: &mut [u8]);
    fn on_write(&mut self, addr: u64, data: &[u8]);
}

struct BarSlot {
    size: u64,
    handler: Box<dyn BarHandler + Send>,
}

/// Six BAR slots, each inactive until [`BarTable::set`] is called.
pub struct BarTable {
    slots: [Option<BarSlot>; BAR_COUNT],
}

impl Default for BarTable {
    fn default() -> Self {
        BarTable::new()
    }
}

impl BarTable {
    pub fn new() -> Self {
        BarTable {
            slots: [None, None, None, None, None, None],
        }
    }

    /// Activate `bar` with the given power-of-two `size` and handler.
    /// A `size` of 0 leaves the BAR inactive (matches the env-var
    /// bootstrap convention).
    pub fn set(&mut self, bar: usize, size: u64, handler: Box<dyn BarHandler + Send>) {
        if size == 0 {
            self.slots[bar] = None;
            return;
        }
        self.slots[bar] = Some(BarSlot { size, handler });
    }

    pub fn size(&self, bar: usize) -> u64 {
        self.slots.get(bar).and_then(|s| s.as_ref()).map_or(0, |s| s.size)
    }

    pub fn is_active(&self, bar: usize) -> bool {
        self.slots.get(bar).map_or(false, |s| s.is_some())
    }

    /// Read `out.len()` bytes at `addr` in `bar`. All-ones if the BAR is
    /// inactive.
    pub fn read(&mut self, bar: usize, addr: u64, out: &mut [u8]) {
        match self.slots.get_mut(bar).and_then(|s| s.as_mut()) {
            Some(slot) => slot.handler.on_read(addr, out),
            None => out.fill(0xff),
        }
    }

    /// Write `data` at `addr` in `bar`. Dropped silently if the BAR is
    /// inactive.
    pub fn write(&mut self, bar: usize, addr: u64, data: &[u8]) {
        if let Some(slot) = self.slots.get_mut(bar).and_then(|s| s.as_mut()) {
            slot.handler.on_write(addr, data);
        }
    }
}
