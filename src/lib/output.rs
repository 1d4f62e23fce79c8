use log::info;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::controller::IoController;

/// Poll intervals selectable by the device's caller: 10^k milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInterval {
    Ms1,
    Ms10,
    Ms100,
    Ms1000,
}

impl PollInterval {
    pub fn from_exponent(exponent: u32) -> Option<Self> {
        match exponent {
            0 => Some(PollInterval::Ms1),
            1 => Some(PollInterval::Ms10),
            2 => Some(PollInterval::Ms100),
            3 => Some(PollInterval::Ms1000),
            _ => None,
        }
    }

    pub fn duration(self) -> Duration {
        let millis = match self {
            PollInterval::Ms1 => 1,
            PollInterval::Ms10 => 10,
            PollInterval::Ms100 => 100,
            PollInterval::Ms1000 => 1000,
        };
        Duration::from_millis(millis)
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        PollInterval::Ms100
    }
}

/// The device-specific action invoked with the data register value whenever
/// the flag bit is found clear.
pub trait OutputAction: Send {
    fn perform(&mut self, value: u32);
}

impl<F: FnMut(u32) + Send> OutputAction for F {
    fn perform(&mut self, value: u32) {
        self(value)
    }
}

/// Commands that can be sent to the output worker thread.
enum OutputCommand {
    JoinThread,
}

/// Settings shared between the worker thread and the caller.
struct OutputSettings {
    powered_on: bool,
    interval: PollInterval,
}

/// An output device bridging the handshake to a periodically sampled
/// action.
///
/// The worker raises the flag on startup, then on every tick: if powered on
/// and the flag is clear, it invokes the action with the current data value
/// and raises the flag again. The power toggle gates the action only, not
/// the timer. The tick sleep doubles as the cancellation point, so `stop`
/// tears the device down within one interval.
pub struct OutputController {
    controller: Arc<Mutex<IoController>>,
    action: Option<Box<dyn OutputAction>>,
    settings: Arc<Mutex<OutputSettings>>,
    worker_tx: Option<Sender<OutputCommand>>,
    worker_thread: Option<thread::JoinHandle<Box<dyn OutputAction>>>,
}

impl OutputController {
    pub fn new(controller: Arc<Mutex<IoController>>, action: Box<dyn OutputAction>) -> Self {
        OutputController {
            controller,
            action: Some(action),
            settings: Arc::new(Mutex::new(OutputSettings {
                powered_on: true,
                interval: PollInterval::default(),
            })),
            worker_tx: None,
            worker_thread: None,
        }
    }

    /// Gate action execution. The polling loop keeps running either way.
    pub fn set_power(&self, powered_on: bool) {
        self.settings.lock().unwrap().powered_on = powered_on;
    }

    /// Change the poll interval; takes effect on the next tick.
    pub fn set_interval(&self, interval: PollInterval) {
        self.settings.lock().unwrap().interval = interval;
    }

    /// Start the polling thread. Panics if already running.
    pub fn start(&mut self) {
        let mut action = self
            .action
            .take()
            .expect("OutputController was already running.");
        info!("Output device starting.");

        let (worker_tx, worker_rx) = mpsc::channel();
        self.worker_tx = Some(worker_tx);
        let controller = Arc::clone(&self.controller);
        let settings = Arc::clone(&self.settings);

        let worker_thread = thread::spawn(move || {
            controller.lock().unwrap().signals_mut().set_flag();
            loop {
                // Sleep one interval; a JoinThread command cuts it short.
                let interval = settings.lock().unwrap().interval.duration();
                match worker_rx.recv_timeout(interval) {
                    Ok(OutputCommand::JoinThread) | Err(RecvTimeoutError::Disconnected) => {
                        return action;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                }

                if !settings.lock().unwrap().powered_on {
                    continue;
                }

                let mut ctrl = controller.lock().unwrap();
                if !ctrl.signals().flag() {
                    let value = ctrl.signals().data();
                    action.perform(value);
                    ctrl.signals_mut().set_flag();
                }
            }
        });
        self.worker_thread = Some(worker_thread);
    }

    /// Stop the polling thread. Panics if not running.
    pub fn stop(&mut self) {
        let worker_thread = self
            .worker_thread
            .take()
            .expect("OutputController was already stopped.");
        self.worker_tx
            .take()
            .unwrap()
            .send(OutputCommand::JoinThread)
            .expect("Failed to send command to output worker.");
        // Re-acquire the action so the device can be restarted.
        let action = worker_thread
            .join()
            .expect("Output worker thread terminated with error.");
        self.action = Some(action);
        info!("Output device stopping.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ntest::timeout;
    use std::sync::mpsc::Receiver;

    use crate::init_test_logging;

    struct OutputFixture {
        controller: Arc<Mutex<IoController>>,
        output: OutputController,
        action_rx: Receiver<u32>,
    }

    impl OutputFixture {
        fn new() -> Self {
            init_test_logging();
            let controller = Arc::new(Mutex::new(IoController::new(2)));
            let (action_tx, action_rx) = mpsc::channel();
            let mut output = OutputController::new(
                Arc::clone(&controller),
                Box::new(move |value| {
                    action_tx.send(value).unwrap();
                }),
            );
            output.set_interval(PollInterval::Ms1);
            output.start();
            OutputFixture {
                controller,
                output,
                action_rx,
            }
        }

        fn flag(&self) -> bool {
            self.controller.lock().unwrap().signals().flag()
        }

        /// Wait for the flag to reach the wanted state.
        fn wait_for_flag(&self, wanted: bool) {
            for _ in 0..1000 {
                if self.flag() == wanted {
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            panic!("flag never became {}", wanted);
        }

        /// Publish a value and request output by clearing the flag.
        fn request_output(&self, value: u32) {
            let mut ctrl = self.controller.lock().unwrap();
            ctrl.signals_mut().set_data(value);
            ctrl.signals_mut().clear_flag();
        }
    }

    impl Drop for OutputFixture {
        fn drop(&mut self) {
            if self.output.worker_thread.is_some() {
                self.output.stop();
            }
        }
    }

    #[test]
    fn test_poll_interval_magnitudes() {
        assert_eq!(PollInterval::from_exponent(0), Some(PollInterval::Ms1));
        assert_eq!(PollInterval::from_exponent(3), Some(PollInterval::Ms1000));
        assert_eq!(PollInterval::from_exponent(4), None);
        assert_eq!(PollInterval::Ms10.duration(), Duration::from_millis(10));
        assert_eq!(PollInterval::default(), PollInterval::Ms100);
    }

    #[test]
    #[timeout(10000)]
    fn test_raises_flag_on_startup() {
        let fixture = OutputFixture::new();
        fixture.wait_for_flag(true);
    }

    #[test]
    #[timeout(10000)]
    fn test_acts_when_flag_cleared() {
        let fixture = OutputFixture::new();
        fixture.wait_for_flag(true);

        fixture.request_output(0x41);
        let value = fixture
            .action_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(value, 0x41);
        fixture.wait_for_flag(true);

        // The handshake repeats.
        fixture.request_output(0x42);
        let value = fixture
            .action_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(value, 0x42);
        fixture.wait_for_flag(true);
    }

    #[test]
    #[timeout(10000)]
    fn test_power_gates_action() {
        let fixture = OutputFixture::new();
        fixture.wait_for_flag(true);

        fixture.output.set_power(false);
        fixture.request_output(0x41);
        // Give the loop plenty of ticks: nothing may happen while off.
        assert!(fixture
            .action_rx
            .recv_timeout(Duration::from_millis(100))
            .is_err());
        assert!(!fixture.flag());

        fixture.output.set_power(true);
        let value = fixture
            .action_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(value, 0x41);
        fixture.wait_for_flag(true);
    }

    #[test]
    #[timeout(10000)]
    fn test_stop_and_restart() {
        let mut fixture = OutputFixture::new();
        fixture.wait_for_flag(true);
        fixture.output.stop();

        // Stopped: a cleared flag stays cleared.
        fixture.request_output(0x41);
        assert!(fixture
            .action_rx
            .recv_timeout(Duration::from_millis(100))
            .is_err());

        // Restarting raises the flag again, discarding the stale request.
        fixture.output.start();
        fixture.wait_for_flag(true);
        assert!(fixture
            .action_rx
            .recv_timeout(Duration::from_millis(100))
            .is_err());

        fixture.request_output(0x42);
        let value = fixture
            .action_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(value, 0x42);
        fixture.wait_for_flag(true);
    }

    #[test]
    #[should_panic(expected = "already running")]
    fn test_double_start_panics() {
        let mut fixture = OutputFixture::new();
        fixture.output.start();
    }
}
