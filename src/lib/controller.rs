use log::trace;

use crate::error::{DeviceError, DeviceResult};

// Register addresses on the peripheral bus.
pub const REG_DATA: usize = 0; // Data (mode-dependent) register.
pub const REG_MODE: usize = 1; // Mode-select register.

/// A write or read destination bound to a register index. Invoked with the
/// bus signals and the register's current value.
pub type Destination = Box<dyn FnMut(&mut Signals, u32) -> DeviceResult<()> + Send>;

/// The externally visible bus state: the register file plus the two
/// handshake bits.
pub struct Signals {
    registers: Vec<u32>,
    ready: bool,
    flag: bool,
}

impl Signals {
    fn new(register_count: usize) -> Self {
        Signals {
            registers: vec![0; register_count],
            ready: false,
            flag: false,
        }
    }

    pub fn register(&self, index: usize) -> u32 {
        self.registers[index]
    }

    pub fn set_register(&mut self, index: usize, value: u32) {
        self.registers[index] = value;
    }

    /// The shared data register used as the payload channel.
    pub fn data(&self) -> u32 {
        self.registers[REG_DATA]
    }

    pub fn set_data(&mut self, value: u32) {
        self.registers[REG_DATA] = value;
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self) {
        self.ready = true;
    }

    pub fn unset_ready(&mut self) {
        self.ready = false;
    }

    pub fn flag(&self) -> bool {
        self.flag
    }

    pub fn set_flag(&mut self) {
        self.flag = true;
    }

    pub fn clear_flag(&mut self) {
        self.flag = false;
    }
}

/// An addressable register bus with per-register destinations and
/// ready/flag handshake signalling.
///
/// A peripheral binds at most one write and one read destination per
/// register index; the CPU side then drives `write` and `read`. Share it as
/// `Arc<Mutex<IoController>>` so that a whole register operation (store,
/// dispatch, handshake updates) is a single critical section.
pub struct IoController {
    signals: Signals,
    write_dests: Vec<Option<Destination>>,
    read_dests: Vec<Option<Destination>>,
}

impl IoController {
    pub fn new(register_count: usize) -> Self {
        IoController {
            signals: Signals::new(register_count),
            write_dests: (0..register_count).map(|_| None).collect(),
            read_dests: (0..register_count).map(|_| None).collect(),
        }
    }

    /// Bind the write destination for a register. Binding a second
    /// destination to the same index is a configuration error.
    pub fn bind_write(&mut self, index: usize, dest: Destination) -> DeviceResult<()> {
        let slot = self
            .write_dests
            .get_mut(index)
            .ok_or(DeviceError::BadRegister(index))?;
        if slot.is_some() {
            return Err(DeviceError::WriteBound(index));
        }
        *slot = Some(dest);
        Ok(())
    }

    /// Bind the read destination for a register.
    pub fn bind_read(&mut self, index: usize, dest: Destination) -> DeviceResult<()> {
        let slot = self
            .read_dests
            .get_mut(index)
            .ok_or(DeviceError::BadRegister(index))?;
        if slot.is_some() {
            return Err(DeviceError::ReadBound(index));
        }
        *slot = Some(dest);
        Ok(())
    }

    /// Handle a CPU register write: store the value, then dispatch to the
    /// bound write destination.
    pub fn write(&mut self, index: usize, value: u32) -> DeviceResult<()> {
        if index >= self.signals.registers.len() {
            return Err(DeviceError::BadRegister(index));
        }
        trace!("register {} <- {:#04X}", index, value);
        self.signals.registers[index] = value;
        self.dispatch(index, true)
    }

    /// Handle a CPU register read: dispatch to the bound read destination,
    /// then return the (possibly updated) register value.
    pub fn read(&mut self, index: usize) -> DeviceResult<u32> {
        if index >= self.signals.registers.len() {
            return Err(DeviceError::BadRegister(index));
        }
        self.dispatch(index, false)?;
        let value = self.signals.registers[index];
        trace!("register {} -> {:#04X}", index, value);
        Ok(value)
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut Signals {
        &mut self.signals
    }

    // Destinations receive `&mut Signals`, so temporarily take the box out
    // of its slot to avoid aliasing `self`.
    fn dispatch(&mut self, index: usize, write: bool) -> DeviceResult<()> {
        let slot = if write {
            &mut self.write_dests[index]
        } else {
            &mut self.read_dests[index]
        };
        match slot.take() {
            None => Ok(()),
            Some(mut dest) => {
                let value = self.signals.registers[index];
                let result = dest(&mut self.signals, value);
                let slot = if write {
                    &mut self.write_dests[index]
                } else {
                    &mut self.read_dests[index]
                };
                *slot = Some(dest);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use crate::init_test_logging;

    #[test]
    fn test_write_stores_and_dispatches() {
        init_test_logging();
        let mut ctrl = IoController::new(2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dest_seen = Arc::clone(&seen);
        ctrl.bind_write(
            REG_DATA,
            Box::new(move |signals, value| {
                // The register must already hold the value when the
                // destination runs.
                assert_eq!(signals.register(REG_DATA), value);
                dest_seen.lock().unwrap().push(value);
                signals.set_ready();
                Ok(())
            }),
        )
        .unwrap();

        ctrl.write(REG_DATA, 0x42).unwrap();
        ctrl.write(REG_DATA, 0x69).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0x42, 0x69]);
        assert_eq!(ctrl.signals().data(), 0x69);
        assert!(ctrl.signals().ready());
    }

    #[test]
    fn test_write_without_destination_still_stores() {
        init_test_logging();
        let mut ctrl = IoController::new(2);
        ctrl.write(REG_MODE, 0xA).unwrap();
        assert_eq!(ctrl.signals().register(REG_MODE), 0xA);
    }

    #[test]
    fn test_read_dispatches_then_loads() {
        init_test_logging();
        let mut ctrl = IoController::new(2);
        ctrl.bind_read(
            REG_DATA,
            Box::new(|signals, _| {
                signals.set_data(0x55);
                Ok(())
            }),
        )
        .unwrap();

        assert_eq!(ctrl.read(REG_DATA).unwrap(), 0x55);
    }

    #[test]
    fn test_binding_collision() {
        init_test_logging();
        let mut ctrl = IoController::new(2);
        ctrl.bind_write(REG_DATA, Box::new(|_, _| Ok(()))).unwrap();
        assert!(matches!(
            ctrl.bind_write(REG_DATA, Box::new(|_, _| Ok(()))),
            Err(DeviceError::WriteBound(REG_DATA))
        ));
        ctrl.bind_read(REG_DATA, Box::new(|_, _| Ok(()))).unwrap();
        assert!(matches!(
            ctrl.bind_read(REG_DATA, Box::new(|_, _| Ok(()))),
            Err(DeviceError::ReadBound(REG_DATA))
        ));
        // A different index is fine.
        ctrl.bind_write(REG_MODE, Box::new(|_, _| Ok(()))).unwrap();
    }

    #[test]
    fn test_bad_register_index() {
        init_test_logging();
        let mut ctrl = IoController::new(2);
        assert!(matches!(
            ctrl.bind_write(2, Box::new(|_, _| Ok(()))),
            Err(DeviceError::BadRegister(2))
        ));
        assert!(matches!(ctrl.write(7, 0), Err(DeviceError::BadRegister(7))));
        assert!(matches!(ctrl.read(7), Err(DeviceError::BadRegister(7))));
    }

    #[test]
    fn test_handshake_bits() {
        init_test_logging();
        let mut ctrl = IoController::new(2);
        assert!(!ctrl.signals().ready());
        assert!(!ctrl.signals().flag());
        ctrl.signals_mut().set_ready();
        ctrl.signals_mut().set_flag();
        assert!(ctrl.signals().ready());
        assert!(ctrl.signals().flag());
        ctrl.signals_mut().unset_ready();
        ctrl.signals_mut().clear_flag();
        assert!(!ctrl.signals().ready());
        assert!(!ctrl.signals().flag());
    }
}
