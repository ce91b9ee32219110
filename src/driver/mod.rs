pub mod hidraw;
pub mod session;
pub mod via;

use std::time::Duration;

use thiserror::Error;

pub use session::{DeviceSession, LedUpdate};

/* Errors raised by the device layer. */
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not opened")]
    NotOpen,

    #[error("device not found: VID={vid:04X} PID={pid:04X} (usage page {usage_page:04X}, usage {usage:02X})")]
    NotFound {
        vid: u16,
        pid: u16,
        usage_page: u16,
        usage: u16,
    },

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("no response from device")]
    NoResponse,

    #[error("command 0x{0:02x} not supported by firmware")]
    Unsupported(u8),

    #[error("device reported zero LEDs")]
    NoLeds,

    #[error("failed to set LEDs at index {start_index}: {source}")]
    Batch {
        start_index: u16,
        #[source]
        source: Box<DeviceError>,
    },
}

/* One open HID interface.
 *
 * Reports passed in and out never carry the report-ID byte; transports that
 * need one add it themselves. The session layer owns the transport and
 * guarantees exclusive access, so implementations need not be `Sync`. */
pub trait HidTransport: Send {
    /* Short name for logging, e.g. the hidraw path. */
    fn name(&self) -> &str;

    /* Write a single report. */
    fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError>;

    /* Read a single report, returning 0 when nothing arrives within `timeout`. */
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError>;
}

/* In-memory transport that answers like a VIA keyboard. */
#[cfg(test)]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::via::{CMD_GET_VALUE, CMD_UNHANDLED, VIALRGB_GET_NUMBER_LEDS};
    use super::{DeviceError, HidTransport};

    #[derive(Default)]
    struct MockState {
        written: Vec<Vec<u8>>,
        pending: VecDeque<Vec<u8>>,
        led_count: Option<u16>,
        fail_write_at: Option<usize>,
        silent: bool,
    }

    /* Cloneable handle; clones share the recorded traffic. */
    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        /* Stock firmware: VialRGB queries come back unhandled. */
        pub fn stock() -> Self {
            Self::default()
        }

        /* Vial firmware reporting `led_count` LEDs. */
        pub fn vial(led_count: u16) -> Self {
            let mock = Self::default();
            mock.state.lock().unwrap().led_count = Some(led_count);
            mock
        }

        /* Firmware that accepts every write but never answers. */
        pub fn silent() -> Self {
            let mock = Self::default();
            mock.state.lock().unwrap().silent = true;
            mock
        }

        /* Make the n-th write (0-based, counting successful ones) fail. */
        pub fn fail_write_at(&self, n: usize) {
            self.state.lock().unwrap().fail_write_at = Some(n);
        }

        pub fn written(&self) -> Vec<Vec<u8>> {
            self.state.lock().unwrap().written.clone()
        }

        pub fn clear(&self) {
            self.state.lock().unwrap().written.clear();
        }
    }

    impl HidTransport for MockTransport {
        fn name(&self) -> &str {
            "mock"
        }

        fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_write_at == Some(state.written.len()) {
                state.fail_write_at = None;
                return Err(DeviceError::Hid(hidapi::HidError::HidApiError {
                    message: "mock write failure".to_string(),
                }));
            }
            state.written.push(report.to_vec());
            if state.silent {
                return Ok(());
            }

            let mut reply = report.to_vec();
            if report.starts_with(&[CMD_GET_VALUE, VIALRGB_GET_NUMBER_LEDS]) {
                match state.led_count {
                    Some(count) => reply[2..4].copy_from_slice(&count.to_le_bytes()),
                    None => reply[0] = CMD_UNHANDLED,
                }
            }
            state.pending.push_back(reply);
            Ok(())
        }

        fn read_report(
            &mut self,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> Result<usize, DeviceError> {
            let mut state = self.state.lock().unwrap();
            match state.pending.pop_front() {
                Some(reply) => {
                    let n = reply.len().min(buf.len());
                    buf[..n].copy_from_slice(&reply[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }
}
