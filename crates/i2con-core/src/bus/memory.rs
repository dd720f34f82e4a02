//! Simulated buses backed by in-memory register files.
//!
//! Word registers follow SMBus ordering: the low byte lives at `register`, the
//! high byte at `register + 1`.

use super::{Bus, BusProvider};
use i2con_proto::BusId;
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;

#[derive(Debug, Default)]
struct State {
    devices: HashMap<(BusId, u16), [u8; 256]>,
    buses: HashSet<BusId>,
    faults: HashSet<(BusId, u16, u8)>,
    opens: usize,
    open_handles: usize,
}

/// Cloning shares the register files, so every session sees the same devices.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<State>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device (and its bus) with all registers zeroed.
    pub fn with_device(self, bus: BusId, address: u16) -> Self {
        {
            let mut state = self.state.lock();
            state.buses.insert(bus);
            state.devices.entry((bus, address)).or_insert([0; 256]);
        }
        self
    }

    pub fn register(&self, bus: BusId, address: u16, register: u8) -> Option<u8> {
        self.state.lock().devices.get(&(bus, address)).map(|regs| regs[register as usize])
    }

    /// Returns false if the device does not exist.
    pub fn set_register(&self, bus: BusId, address: u16, register: u8, value: u8) -> bool {
        match self.state.lock().devices.get_mut(&(bus, address)) {
            Some(regs) => {
                regs[register as usize] = value;
                true
            }
            None => false,
        }
    }

    /// Make every access to this register fail with an I/O error.
    pub fn fail_register(&self, bus: BusId, address: u16, register: u8) {
        self.state.lock().faults.insert((bus, address, register));
    }

    /// Number of successful `open` calls so far.
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Handles opened and not yet dropped.
    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }
}

impl BusProvider for MemoryBus {
    type Handle = MemoryHandle;

    fn open(&self, bus: BusId) -> io::Result<MemoryHandle> {
        let mut state = self.state.lock();
        if !state.buses.contains(&bus) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("no simulated bus {bus}")));
        }
        state.opens += 1;
        state.open_handles += 1;
        debug!("opened simulated bus {bus}");
        Ok(MemoryHandle {
            bus,
            selected: None,
            state: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryHandle {
    bus: BusId,
    selected: Option<u16>,
    state: Arc<Mutex<State>>,
}

impl MemoryHandle {
    fn access<T>(&self, register: u8, f: impl FnOnce(&mut [u8; 256]) -> T) -> io::Result<T> {
        let address = self
            .selected
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no device selected"))?;
        let mut state = self.state.lock();
        if state.faults.contains(&(self.bus, address, register)) {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated transfer failure"));
        }
        let regs = state
            .devices
            .get_mut(&(self.bus, address))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "device vanished"))?;
        Ok(f(regs))
    }
}

impl Bus for MemoryHandle {
    fn select_device(&mut self, address: u16) -> io::Result<()> {
        if !self.state.lock().devices.contains_key(&(self.bus, address)) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no device at {address:#04x} on bus {}", self.bus),
            ));
        }
        self.selected = Some(address);
        Ok(())
    }

    fn read_byte_data(&mut self, register: u8) -> io::Result<u8> {
        self.access(register, |regs| regs[register as usize])
    }

    fn read_word_data(&mut self, register: u8) -> io::Result<u16> {
        let high = register.wrapping_add(1) as usize;
        self.access(register, |regs| u16::from_le_bytes([regs[register as usize], regs[high]]))
    }

    fn write_byte_data(&mut self, register: u8, value: u8) -> io::Result<()> {
        self.access(register, |regs| regs[register as usize] = value)
    }

    fn write_word_data(&mut self, register: u8, value: u16) -> io::Result<()> {
        let [low, high] = value.to_le_bytes();
        self.access(register, |regs| {
            regs[register as usize] = low;
            regs[register.wrapping_add(1) as usize] = high;
        })
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.state.lock().open_handles -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bus_does_not_open() {
        let sim = MemoryBus::new().with_device(1, 0x29);
        let err = sim.open(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(sim.opens(), 0);
    }

    #[test]
    fn select_requires_known_device() {
        let sim = MemoryBus::new().with_device(1, 0x29);
        let mut bus = sim.open(1).unwrap();
        assert!(bus.select_device(0x30).is_err());
        assert!(bus.read_byte_data(0).is_err());
        bus.select_device(0x29).unwrap();
        assert_eq!(bus.read_byte_data(0).unwrap(), 0);
    }

    #[test]
    fn word_registers_are_little_endian_pairs() {
        let sim = MemoryBus::new().with_device(1, 0x29);
        let mut bus = sim.open(1).unwrap();
        bus.select_device(0x29).unwrap();
        bus.write_word_data(0x96, 0x1234).unwrap();
        assert_eq!(sim.register(1, 0x29, 0x96), Some(0x34));
        assert_eq!(sim.register(1, 0x29, 0x97), Some(0x12));
        assert_eq!(bus.read_word_data(0x96).unwrap(), 0x1234);
    }

    #[test]
    fn faults_and_handle_release() {
        let sim = MemoryBus::new().with_device(1, 0x29);
        sim.fail_register(1, 0x29, 0x10);
        {
            let mut bus = sim.open(1).unwrap();
            bus.select_device(0x29).unwrap();
            assert!(bus.write_byte_data(0x10, 1).is_err());
            assert!(bus.write_byte_data(0x11, 1).is_ok());
            assert_eq!(sim.open_handles(), 1);
        }
        assert_eq!(sim.open_handles(), 0);
        assert_eq!(sim.opens(), 1);
    }
}
