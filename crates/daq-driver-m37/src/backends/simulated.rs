//! In-process model of an M37 module.
//!
//! Behaves like the hardware as seen through its register window:
//!
//! - data register writes are held until an update strobe, which latches
//!   them as one committed frame;
//! - the status register reports power, buffer-ready after a configurable
//!   number of reads following each strobe, and a pending interrupt;
//! - every load register write is recorded so a shifted bitstream can be
//!   decoded again;
//! - the identity PROM holds an M37 header by default.
//!
//! Clones share state, so a test can keep one handle while the device owns
//! another.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::{Frame, CHANNEL_COUNT};
use crate::regs::{
    ConfigFlags, LoadLines, RegisterAccess, StatusFlags, CONFIG_REG, ID_M37, ID_MAGIC, ID_WORDS,
    LOAD_REG, STATUS_REG,
};

#[derive(Debug)]
struct SimState {
    data: [u16; CHANNEL_COUNT],
    config: u16,
    config_writes: Vec<u16>,
    committed: Vec<Frame>,
    load_writes: Vec<u16>,
    id_words: [u16; ID_WORDS],
    power: bool,
    ready_latency: Option<u32>,
    reads_since_update: u32,
    irq_pending: bool,
    status_reads: u32,
}

impl Default for SimState {
    fn default() -> Self {
        let mut id_words = [0u16; ID_WORDS];
        id_words[0] = ID_MAGIC;
        id_words[1] = ID_M37;
        Self {
            data: [0; CHANNEL_COUNT],
            config: 0,
            config_writes: Vec::new(),
            committed: Vec::new(),
            load_writes: Vec::new(),
            id_words,
            power: true,
            ready_latency: Some(0),
            reads_since_update: 0,
            irq_pending: false,
            status_reads: 0,
        }
    }
}

/// Simulated M37 register window.
#[derive(Debug, Clone, Default)]
pub struct SimulatedModule {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedModule {
    /// Powered module, ready immediately after every strobe, M37 identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace identity words 0 and 1.
    pub fn with_identity(self, magic: u16, id: u16) -> Self {
        {
            let mut state = self.state.lock();
            state.id_words[0] = magic;
            state.id_words[1] = id;
        }
        self
    }

    /// Set one identity word.
    pub fn set_id_word(&self, index: usize, value: u16) {
        if let Some(word) = self.state.lock().id_words.get_mut(index) {
            *word = value;
        }
    }

    /// Switch the analog power supply.
    pub fn set_power(&self, present: bool) {
        self.state.lock().power = present;
    }

    /// Status reads after a strobe before buffer-ready shows; `None` = never.
    pub fn set_ready_latency(&self, reads: Option<u32>) {
        let mut state = self.state.lock();
        state.ready_latency = reads;
        state.reads_since_update = 0;
    }

    /// Raise or drop the interrupt-pending status bit.
    pub fn set_irq_pending(&self, pending: bool) {
        self.state.lock().irq_pending = pending;
    }

    /// Current data register contents.
    pub fn data_registers(&self) -> Frame {
        Frame::new(self.state.lock().data)
    }

    /// Last value written to the configuration register.
    pub fn config(&self) -> u16 {
        self.state.lock().config
    }

    /// Every configuration register write, oldest first.
    pub fn config_writes(&self) -> Vec<u16> {
        self.state.lock().config_writes.clone()
    }

    /// Frames latched by update strobes, oldest first.
    pub fn committed_frames(&self) -> Vec<Frame> {
        self.state.lock().committed.clone()
    }

    /// Every load register write, oldest first.
    pub fn load_writes(&self) -> Vec<u16> {
        self.state.lock().load_writes.clone()
    }

    /// Status register reads so far.
    pub fn status_reads(&self) -> u32 {
        self.state.lock().status_reads
    }

    /// Forget recorded writes, strobes and reads.
    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.config_writes.clear();
        state.committed.clear();
        state.load_writes.clear();
        state.status_reads = 0;
    }

    /// Decode the bytes shifted in through the load register.
    ///
    /// Samples TDO and TMS on every rising edge of TCK, four 2-bit groups per
    /// byte, least significant group first. A trailing partial byte is
    /// dropped.
    pub fn shifted_bytes(&self) -> Vec<u8> {
        let state = self.state.lock();
        let mut bytes = Vec::new();
        let mut clock = false;
        let mut current = 0u8;
        let mut groups = 0;

        for &raw in &state.load_writes {
            let lines = LoadLines::from_bits_truncate(raw);
            let high = lines.contains(LoadLines::TCK);
            if high && !clock {
                let mut group = 0u8;
                if lines.contains(LoadLines::TDO) {
                    group |= 0x01;
                }
                if lines.contains(LoadLines::TMS) {
                    group |= 0x02;
                }
                current |= group << (2 * groups);
                groups += 1;
                if groups == 4 {
                    bytes.push(current);
                    current = 0;
                    groups = 0;
                }
            }
            clock = high;
        }
        bytes
    }
}

impl RegisterAccess for SimulatedModule {
    fn read16(&self, offset: u16) -> u16 {
        let mut state = self.state.lock();
        if offset != STATUS_REG {
            return 0;
        }

        state.status_reads += 1;
        let mut status = StatusFlags::empty();
        if state.power {
            status |= StatusFlags::POWER;
        }
        if state
            .ready_latency
            .is_some_and(|latency| state.reads_since_update >= latency)
        {
            status |= StatusFlags::BUFFER_READY;
        }
        if state.irq_pending {
            status |= StatusFlags::IRQ_PENDING;
        }
        state.reads_since_update = state.reads_since_update.saturating_add(1);
        status.bits()
    }

    fn write16(&self, offset: u16, value: u16) {
        let mut state = self.state.lock();
        match offset {
            CONFIG_REG => {
                state.config = value;
                state.config_writes.push(value);
                if ConfigFlags::from_bits_truncate(value).contains(ConfigFlags::UPDATE) {
                    let frame = Frame::new(state.data);
                    state.committed.push(frame);
                    state.reads_since_update = 0;
                    state.irq_pending = false;
                }
            }
            LOAD_REG => state.load_writes.push(value),
            offset if offset % 2 == 0 && usize::from(offset / 2) < CHANNEL_COUNT => {
                state.data[usize::from(offset / 2)] = value;
            }
            _ => {}
        }
    }

    fn read_id_word(&self, index: u16) -> u16 {
        self.state
            .lock()
            .id_words
            .get(usize::from(index))
            .copied()
            .unwrap_or(0xFFFF)
    }
}
