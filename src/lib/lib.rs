mod controller;
mod disk;
mod error;
mod memory;
mod output;

pub use crate::controller::{Destination, IoController, Signals, REG_DATA, REG_MODE};
pub use crate::disk::{DiskDrive, DISK_IMAGE_SIZE};
pub use crate::error::{DeviceError, DeviceResult};
pub use crate::memory::{MemoryCell, MAX_ADDRESS, MAX_VALUE};
pub use crate::output::{OutputAction, OutputController, PollInterval};

/// Initialise logging for tests.
#[cfg(test)]
pub fn init_test_logging() {
    // The logger can only be initialised once, but we don't know the order of
    // tests. Therefore we ignore the result.
    let _ = simplelog::TestLogger::init(
        log::LevelFilter::Trace,
        simplelog::Config::default(),
    );
}
