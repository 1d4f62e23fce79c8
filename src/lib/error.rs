use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the I/O subsystem.
///
/// Device faults (the disk's dead state) are not errors: they are visible
/// only through the handshake and register values, like on the real bus.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("register {0} already has a write destination")]
    WriteBound(usize),

    #[error("register {0} already has a read destination")]
    ReadBound(usize),

    #[error("no such register: {0}")]
    BadRegister(usize),

    #[error("failed to read disk image '{}': {source}", .path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write disk image '{}': {source}", .path.display())]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("memory address {0:#05X} exceeds the 11-bit address space")]
    AddressRange(u32),

    #[error("memory value {0:#06X} exceeds 16 bits")]
    ValueRange(u32),
}

pub type DeviceResult<T> = Result<T, DeviceError>;
