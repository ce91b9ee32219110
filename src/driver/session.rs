/* Device session: one open handle to one keyboard.
 *
 * All hardware I/O goes through this struct. A single async mutex guards the
 * transport and the cached LED count, so a multi-report operation such as
 * `set_leds` is never interleaved with another caller's reports on the wire.
 *
 * Lifecycle is Closed -> Open -> Closed. A failed operation leaves the
 * session open; the caller decides whether to carry on or close. */

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::via::{self, CMD_UNHANDLED, ReportFormat, VIALRGB_EFFECT_DIRECT, VIALRGB_GET_NUMBER_LEDS};
use super::{DeviceError, HidTransport, hidraw};
use crate::color::{HsvColor, RgbColor};
use crate::config::DeviceConfig;

/* Reply wait after every write. Most writes never get a useful reply. */
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/* Gap between consecutive direct-set reports */
const PACKET_DELAY: Duration = Duration::from_millis(1);

/* One per-LED instruction. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedUpdate {
    pub index: u16,
    pub color: HsvColor,
}

#[derive(Default)]
struct SessionState {
    io: Option<Box<dyn HidTransport>>,
    led_count: Option<u16>,
}

pub struct DeviceSession {
    device: DeviceConfig,
    format: ReportFormat,
    state: Mutex<SessionState>,
}

impl DeviceSession {
    pub fn new(device: DeviceConfig, format: ReportFormat) -> Self {
        Self {
            device,
            format,
            state: Mutex::new(SessionState::default()),
        }
    }

    /* Enumerate and open the configured interface. No-op when already open. */
    pub async fn open(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().await;
        if state.io.is_some() {
            return Ok(());
        }

        let device = self.device.clone();
        let transport = tokio::task::spawn_blocking(move || hidraw::open_interface(&device))
            .await
            .map_err(|e| {
                DeviceError::Hid(hidapi::HidError::HidApiError {
                    message: format!("open task failed: {e}"),
                })
            })??;

        info!(
            "Opened {:04x}:{:04x} at {}",
            self.device.vendor_id,
            self.device.product_id,
            transport.name()
        );
        state.io = Some(Box::new(transport));
        Ok(())
    }

    /* Adopt an already opened transport. */
    #[cfg(test)]
    pub async fn open_with(&self, transport: Box<dyn HidTransport>) {
        let mut state = self.state.lock().await;
        debug!("Session attached to {}", transport.name());
        state.io = Some(transport);
    }

    /* Release the handle. Safe to call repeatedly or before `open`. */
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(io) = state.io.take() {
            info!("Closed {}", io.name());
        }
        state.led_count = None;
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.io.is_some()
    }

    /* Send one report and wait briefly for the reply the protocol expects.
     * A missing reply is normal and not an error. */
    pub async fn write(&self, report: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state.lock().await;
        let io = state.io.as_deref_mut().ok_or(DeviceError::NotOpen)?;
        self.exchange(io, report).map(|_| ())
    }

    fn exchange(&self, io: &mut dyn HidTransport, report: &[u8]) -> Result<Vec<u8>, DeviceError> {
        io.write_report(report)?;

        let mut reply = vec![0u8; self.format.size()];
        match io.read_report(&mut reply, READ_TIMEOUT) {
            Ok(n) => reply.truncate(n),
            Err(e) => {
                debug!("Ignoring read error after write: {e}");
                reply.clear();
            }
        }
        Ok(reply)
    }

    pub async fn set_effect(&self, effect: u8) -> Result<(), DeviceError> {
        self.write(&self.format.build_set_effect(effect)).await
    }

    pub async fn set_brightness(&self, brightness: u8) -> Result<(), DeviceError> {
        self.write(&self.format.build_set_brightness(brightness)).await
    }

    /* RGB Matrix color. Only hue and saturation are sent; value follows the
     * brightness setting. */
    pub async fn set_global_color(&self, color: RgbColor) -> Result<(), DeviceError> {
        let hsv = color.to_hsv();
        self.write(&self.format.build_set_color(hsv.h, hsv.s)).await
    }

    /* Switch VialRGB into direct mode at full saturation and value. */
    pub async fn enable_vial_direct_mode(&self, speed: u8) -> Result<(), DeviceError> {
        let report =
            self.format
                .build_vial_set_mode(VIALRGB_EFFECT_DIRECT, speed, HsvColor::new(0, 255, 255));
        self.write(&report).await
    }

    /* Number of LEDs, queried once and cached. Failures are not cached. */
    pub async fn led_count(&self) -> Result<u16, DeviceError> {
        let mut state = self.state.lock().await;
        if let Some(count) = state.led_count {
            return Ok(count);
        }

        let io = state.io.as_deref_mut().ok_or(DeviceError::NotOpen)?;
        let reply = self.exchange(io, &self.format.build_get_led_count())?;

        match reply.first() {
            None => return Err(DeviceError::NoResponse),
            Some(&CMD_UNHANDLED) => return Err(DeviceError::Unsupported(VIALRGB_GET_NUMBER_LEDS)),
            Some(_) => {}
        }

        let count = via::parse_led_count_response(&reply);
        if count == 0 {
            return Err(DeviceError::NoLeds);
        }

        debug!("Device reports {count} LEDs");
        state.led_count = Some(count);
        Ok(count)
    }

    /* Stream per-LED colors in direct mode.
     *
     * `updates` must be in ascending index order. They are cut into runs of
     * at most one report's capacity; each run is sent starting at its first
     * element's index and the firmware fills consecutive LEDs from there.
     * The first failing report aborts the call; reports already sent stay
     * applied. */
    pub async fn set_leds(&self, updates: &[LedUpdate]) -> Result<(), DeviceError> {
        let mut state = self.state.lock().await;
        let io = state.io.as_deref_mut().ok_or(DeviceError::NotOpen)?;

        let mut runs = updates.chunks(self.format.max_leds_per_packet()).peekable();
        while let Some(run) = runs.next() {
            let start_index = run[0].index;
            let colors: Vec<HsvColor> = run.iter().map(|u| u.color).collect();
            let report = self.format.build_direct_set(start_index, &colors);

            self.exchange(io, &report)
                .map_err(|source| DeviceError::Batch {
                    start_index,
                    source: Box::new(source),
                })?;

            if runs.peek().is_some() {
                tokio::time::sleep(PACKET_DELAY).await;
            }
        }
        Ok(())
    }

    /* Paint LEDs `0..count` with one color. */
    pub async fn set_all_leds(&self, color: HsvColor, count: u16) -> Result<(), DeviceError> {
        let updates: Vec<LedUpdate> = (0..count).map(|index| LedUpdate { index, color }).collect();
        self.set_leds(&updates).await
    }
}
