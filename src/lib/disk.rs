use log::{debug, info, trace};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::controller::{IoController, Signals, REG_DATA, REG_MODE};
use crate::error::{DeviceError, DeviceResult};

/// Size of the virtual disk image in bytes.
pub const DISK_IMAGE_SIZE: usize = 65536;

// Masks for the two halves of the position cursor.
const POSITION_BYTE_MASK: u32 = 0x00FF;
const POSITION_SECTOR_MASK: u32 = 0xFF00;

// Control command codes (CTRL mode).
const CTRL_SYNC: u32 = 0x69;

// Value forced into both registers when the drive dies.
const FAULT_VALUE: u32 = 0xFF;

/// Interpretation of the data register, selected through the mode register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Data,    // 0x0: data register is the byte on disk.
    Seek,    // 0xA: data register is a signed offset.
    ByteN,   // 0xB: data register is the byte number within the sector.
    SectorN, // 0xC: data register is the sector number.
    Ctrl,    // 0xF: data register is a control command code.
}

impl Mode {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(Mode::Data),
            0xA => Some(Mode::Seek),
            0xB => Some(Mode::ByteN),
            0xC => Some(Mode::SectorN),
            0xF => Some(Mode::Ctrl),
            _ => None,
        }
    }
}

/// Drive state shared between the bound bus destinations and the
/// caller-facing operations.
struct DriveState {
    image: Vec<u8>,
    /// Position cursor in [0, DISK_IMAGE_SIZE]. The upper bound is a valid
    /// post-increment sentinel; the next data write there faults.
    position: u32,
    mode: Mode,
    dead: bool,
    image_path: Option<PathBuf>,
}

impl DriveState {
    fn new() -> Self {
        DriveState {
            image: vec![0; DISK_IMAGE_SIZE],
            position: 0,
            mode: Mode::Data,
            dead: false,
            image_path: None,
        }
    }

    /// Terminal fault: force both registers to the fault value and suppress
    /// all further ready signalling until an image load resets the drive.
    fn die(&mut self, signals: &mut Signals) {
        debug!("disk drive entered the dead state");
        signals.set_register(REG_DATA, FAULT_VALUE);
        signals.set_register(REG_MODE, FAULT_VALUE);
        self.dead = true;
    }

    fn set_ready(&self, signals: &mut Signals) {
        if !self.dead {
            signals.set_ready();
        }
    }

    /// Mode-select register write.
    fn select_mode(&mut self, signals: &mut Signals, code: u32) {
        signals.unset_ready();

        let new_mode = match Mode::from_code(code) {
            Some(mode) => mode,
            None => {
                debug!("invalid mode code {:#04X}", code);
                self.die(signals);
                return;
            }
        };

        if new_mode == self.mode {
            trace!("mode register rewrite: already in {:?}", self.mode);
            self.set_ready(signals);
            return;
        }

        self.mode = new_mode;
        let echo = match new_mode {
            Mode::Data => {
                if self.position as usize >= DISK_IMAGE_SIZE {
                    debug!("selected data mode at end of image");
                    self.die(signals);
                    return;
                }
                u32::from(self.image[self.position as usize])
            }
            Mode::ByteN => self.position & POSITION_BYTE_MASK,
            Mode::SectorN => (self.position & POSITION_SECTOR_MASK) >> 8,
            Mode::Seek | Mode::Ctrl => 0,
        };
        signals.set_data(echo);
        self.set_ready(signals);
    }

    /// Data register write; the action depends on the current mode.
    fn write_data(&mut self, signals: &mut Signals, value: u32) -> DeviceResult<()> {
        signals.unset_ready();

        match self.mode {
            Mode::Data => {
                if self.position as usize == DISK_IMAGE_SIZE {
                    debug!("write past the end of the image");
                    self.die(signals);
                    return Ok(());
                }
                self.image[self.position as usize] = value as u8;
                self.position += 1;
            }
            Mode::Seek => {
                // The payload is a signed 8-bit two's-complement offset.
                let offset = i32::from(value as u8 as i8);
                let target = self.position as i32 + offset;
                if !(0..DISK_IMAGE_SIZE as i32).contains(&target) {
                    debug!("seek out of range: {} + {}", self.position, offset);
                    self.die(signals);
                    return Ok(());
                }
                self.position = target as u32;
            }
            Mode::ByteN => {
                self.position =
                    (self.position & POSITION_SECTOR_MASK) | (value & POSITION_BYTE_MASK);
            }
            Mode::SectorN => {
                self.position =
                    (self.position & POSITION_BYTE_MASK) | ((value & POSITION_BYTE_MASK) << 8);
            }
            Mode::Ctrl => {
                if value == CTRL_SYNC {
                    self.sync(signals)?;
                }
                // Other control codes are currently no-ops.
            }
        }

        self.set_ready(signals);
        Ok(())
    }

    /// Data register read; only meaningful in data mode. The position is
    /// advanced *before* the byte is loaded, unlike the write path which
    /// advances after storing. This matches the original hardware contract.
    fn read_data(&mut self, signals: &mut Signals) {
        if self.mode != Mode::Data {
            return;
        }
        signals.unset_ready();

        if self.position as usize + 1 >= DISK_IMAGE_SIZE {
            debug!("read past the end of the image");
            self.die(signals);
            return;
        }
        self.position += 1;
        signals.set_data(u32::from(self.image[self.position as usize]));
        self.set_ready(signals);
    }

    /// Install an image, zero-padded or truncated to the disk size. This is
    /// also the external corrective action for a dead drive.
    fn load_bytes(&mut self, signals: &mut Signals, bytes: &[u8]) {
        signals.unset_ready();

        let take = bytes.len().min(DISK_IMAGE_SIZE);
        self.image[..take].copy_from_slice(&bytes[..take]);
        self.image[take..].fill(0);
        self.position = 0;
        self.dead = false;

        signals.set_data(u32::from(self.image[0]));
        self.set_ready(signals);
    }

    /// Overwrite the backing file's entire contents with the current image.
    /// Syncing with no backing file is a device fault.
    fn sync(&mut self, signals: &mut Signals) -> DeviceResult<()> {
        let path = match &self.image_path {
            Some(path) => path.clone(),
            None => {
                debug!("sync requested with no backing image file");
                self.die(signals);
                return Ok(());
            }
        };
        info!("syncing disk image to '{}'", path.display());
        fs::write(&path, &self.image).map_err(|source| DeviceError::ImageWrite { path, source })
    }
}

/// A disk drive exposing a byte-addressable 64KiB virtual disk through the
/// two-register handshake protocol.
///
/// Register 1 selects the mode; register 0 is interpreted according to the
/// current mode (see [`Mode`]). Every accepted operation ends by raising
/// ready; a dead drive never raises ready again until a new image is loaded.
pub struct DiskDrive {
    controller: Arc<Mutex<IoController>>,
    state: Arc<Mutex<DriveState>>,
}

impl DiskDrive {
    /// Attach a drive to the controller by binding its register
    /// destinations. Fails if the controller is too small or another
    /// peripheral already claimed the registers.
    pub fn connect(controller: Arc<Mutex<IoController>>) -> DeviceResult<Self> {
        let state = Arc::new(Mutex::new(DriveState::new()));

        {
            let mut ctrl = controller.lock().unwrap();

            let st = Arc::clone(&state);
            ctrl.bind_write(
                REG_MODE,
                Box::new(move |signals, value| {
                    st.lock().unwrap().select_mode(signals, value);
                    Ok(())
                }),
            )?;

            let st = Arc::clone(&state);
            ctrl.bind_write(
                REG_DATA,
                Box::new(move |signals, value| st.lock().unwrap().write_data(signals, value)),
            )?;

            let st = Arc::clone(&state);
            ctrl.bind_read(
                REG_DATA,
                Box::new(move |signals, _| {
                    st.lock().unwrap().read_data(signals);
                    Ok(())
                }),
            )?;
        }

        info!("disk drive connected");
        Ok(DiskDrive { controller, state })
    }

    /// Load a disk image from a file and make it the backing file for
    /// subsequent syncs. A read failure is surfaced to the caller and leaves
    /// the drive untouched.
    pub fn load_image<P: AsRef<Path>>(&self, path: P) -> DeviceResult<()> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| DeviceError::ImageRead {
            path: path.to_path_buf(),
            source,
        })?;
        info!("loading disk image '{}' ({} bytes)", path.display(), bytes.len());

        // Lock order: controller, then drive state (same as the bus path).
        let mut ctrl = self.controller.lock().unwrap();
        let mut drive = self.state.lock().unwrap();
        drive.image_path = Some(path.to_path_buf());
        drive.load_bytes(ctrl.signals_mut(), &bytes);
        Ok(())
    }

    /// Load an in-memory image. The backing file path is left untouched, so
    /// this does not by itself make the drive syncable.
    pub fn load_image_bytes(&self, bytes: &[u8]) {
        let mut ctrl = self.controller.lock().unwrap();
        let mut drive = self.state.lock().unwrap();
        drive.load_bytes(ctrl.signals_mut(), bytes);
    }
}
