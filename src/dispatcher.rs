/* Turns a layout code into device writes.
 *
 * Strategy per lighting variant:
 *   StockMono  global RGB Matrix color
 *   VialMono   direct mode, every LED the same color
 *   VialDraw   direct mode, flag expanded over the LED table
 *
 * Only the final write of `apply_layout` is fatal to the call. Re-entering
 * direct mode and the LED-count query fall back with a warning. */

use tracing::{debug, info, warn};

use crate::config::{Config, Lighting};
use crate::driver::via::EFFECT_SOLID_COLOR;
use crate::driver::{DeviceError, DeviceSession};
use crate::resolver;

/* LED count assumed when the firmware cannot be asked */
pub const DEFAULT_LED_COUNT: u16 = 87;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    NoMapping,
}

pub struct Dispatcher {
    config: Config,
    device: DeviceSession,
}

impl Dispatcher {
    pub fn new(config: Config, device: DeviceSession) -> Self {
        Self { config, device }
    }

    #[cfg(test)]
    pub fn device(&self) -> &DeviceSession {
        &self.device
    }

    /* Put the lighting into the state `apply_layout` expects. */
    pub async fn initialize(&self) -> Result<(), DeviceError> {
        match &self.config.lighting {
            Lighting::StockMono { .. } => {
                self.device.set_effect(EFFECT_SOLID_COLOR).await?;
                if let Some(level) = self.config.brightness {
                    if let Err(e) = self.device.set_brightness(level).await {
                        warn!("Failed to set brightness {level}: {e}");
                    }
                }
                info!("Stock firmware: solid color effect enabled");
            }
            Lighting::VialMono { .. } | Lighting::VialDraw { .. } => {
                match self.device.led_count().await {
                    Ok(count) => info!("Keyboard has {count} LEDs"),
                    Err(e) => warn!("Could not query LED count: {e}"),
                }
                self.device.enable_vial_direct_mode(self.config.speed).await?;
                info!("Vial firmware: direct mode enabled");
            }
        }
        Ok(())
    }

    /* Show the appearance configured for `layout`. */
    pub async fn apply_layout(&self, layout: &str) -> Result<Outcome, DeviceError> {
        match &self.config.lighting {
            Lighting::StockMono { .. } => {
                let Some(color) = resolver::color_for(&self.config, layout) else {
                    return Ok(self.no_mapping(layout));
                };
                self.device.set_global_color(color).await?;
                info!("Layout '{layout}': color {color}");
            }
            Lighting::VialMono { .. } => {
                let Some(color) = resolver::color_for(&self.config, layout) else {
                    return Ok(self.no_mapping(layout));
                };
                let count = self.prepare_direct().await;
                self.device.set_all_leds(color.to_hsv(), count).await?;
                info!("Layout '{layout}': color {color} on {count} LEDs");
            }
            Lighting::VialDraw { keyboard, .. } => {
                let Some(flag) = resolver::flag_for(&self.config, layout) else {
                    return Ok(self.no_mapping(layout));
                };
                let count = self.prepare_direct().await;
                let updates = resolver::expand_flag(flag, &keyboard.rows, count);
                self.device.set_leds(&updates).await?;
                info!(
                    "Layout '{layout}': flag '{}' with {} stripe(s)",
                    flag.layout,
                    flag.stripes.len()
                );
            }
        }
        Ok(Outcome::Applied)
    }

    fn no_mapping(&self, layout: &str) -> Outcome {
        info!("No mapping for layout '{layout}'");
        Outcome::NoMapping
    }

    /* Re-enter direct mode (another host tool may have changed the effect)
     * and return the LED count to paint. */
    async fn prepare_direct(&self) -> u16 {
        if let Err(e) = self.device.enable_vial_direct_mode(self.config.speed).await {
            warn!("Failed to re-enable direct mode: {e}");
        }
        match self.device.led_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("LED count unavailable ({e}), assuming {DEFAULT_LED_COUNT}");
                DEFAULT_LED_COUNT
            }
        }
    }

    pub async fn close(&self) {
        if self.device.is_open().await {
            debug!("Closing keyboard");
        }
        self.device.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::HsvColor;
    use crate::driver::mock::MockTransport;
    use crate::driver::via::{CMD_SET_VALUE, VIALRGB_DIRECT_FASTSET, VIALRGB_SET_MODE};

    const VIAL_MONO: &str = r#"
[device]
vendor_id = 0x3434
product_id = 0x0331

[[colors]]
layout = "ru"
color = { rgb = [255, 0, 0] }

[[colors]]
layout = "*"
color = { rgb = [255, 255, 255] }
"#;

    async fn dispatcher(text: &str, mock: &MockTransport) -> Dispatcher {
        let config = Config::from_toml_str(text).unwrap();
        let session = DeviceSession::new(config.device.clone(), config.report);
        session.open_with(Box::new(mock.clone())).await;
        Dispatcher::new(config, session)
    }

    fn direct_sets(written: &[Vec<u8>]) -> Vec<&Vec<u8>> {
        written
            .iter()
            .filter(|r| r.starts_with(&[CMD_SET_VALUE, VIALRGB_DIRECT_FASTSET]))
            .collect()
    }

    /* Every HSV triple carried by the direct-set reports, in wire order. */
    fn painted(written: &[Vec<u8>]) -> Vec<HsvColor> {
        direct_sets(written)
            .into_iter()
            .flat_map(|r| {
                let count = usize::from(r[4]);
                r[5..5 + count * 3]
                    .chunks_exact(3)
                    .map(|c| HsvColor::new(c[0], c[1], c[2]))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_vial_mono_end_to_end() {
        let mock = MockTransport::vial(87);
        let d = dispatcher(VIAL_MONO, &mock).await;

        d.initialize().await.unwrap();
        mock.clear();

        assert_eq!(d.apply_layout("ru").await.unwrap(), Outcome::Applied);
        let written = mock.written();
        assert!(written[0].starts_with(&[CMD_SET_VALUE, VIALRGB_SET_MODE]));
        let colors = painted(&written);
        assert_eq!(colors.len(), 87);
        assert!(colors.iter().all(|&c| c == HsvColor::new(0, 255, 255)));
        /* 87 LEDs at 9 per report */
        assert_eq!(direct_sets(&written).len(), 10);

        mock.clear();
        assert_eq!(d.apply_layout("fr").await.unwrap(), Outcome::Applied);
        let colors = painted(&mock.written());
        assert_eq!(colors.len(), 87);
        assert!(colors.iter().all(|&c| c == HsvColor::new(0, 0, 255)));
    }

    #[tokio::test]
    async fn test_initialize_vial_queries_count_then_direct_mode() {
        let mock = MockTransport::vial(10);
        let d = dispatcher(VIAL_MONO, &mock).await;

        d.initialize().await.unwrap();
        let written = mock.written();
        assert_eq!(written.len(), 2);
        assert_eq!(&written[0][..2], &[0x08, 0x43]);
        assert_eq!(&written[1][..5], &[0x07, 0x41, 0x01, 0x00, 128]);
    }

    #[tokio::test]
    async fn test_led_count_falls_back_to_default() {
        /* direct mode works but the count query comes back unhandled */
        let mock = MockTransport::stock();
        let d = dispatcher(VIAL_MONO, &mock).await;

        d.initialize().await.unwrap();
        mock.clear();
        d.apply_layout("ru").await.unwrap();
        assert_eq!(painted(&mock.written()).len(), usize::from(DEFAULT_LED_COUNT));
    }

    #[tokio::test]
    async fn test_no_mapping_is_a_noop() {
        let text = VIAL_MONO.split("[[colors]]\nlayout = \"*\"").next().unwrap();
        let mock = MockTransport::vial(20);
        let d = dispatcher(text, &mock).await;

        assert_eq!(d.apply_layout("de").await.unwrap(), Outcome::NoMapping);
        assert!(mock.written().is_empty());
    }

    #[tokio::test]
    async fn test_stock_mono() {
        let text = format!("firmware = \"stock\"\nbrightness = 180\n{VIAL_MONO}");
        let mock = MockTransport::stock();
        let d = dispatcher(&text, &mock).await;

        d.initialize().await.unwrap();
        d.apply_layout("ru").await.unwrap();

        let written = mock.written();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|r| r.len() == 64));
        assert_eq!(&written[0][..4], &[0x07, 0x03, 0x02, 0x01]);
        assert_eq!(&written[1][..4], &[0x07, 0x03, 0x01, 180]);
        assert_eq!(&written[2][..5], &[0x07, 0x03, 0x04, 0, 255]);
    }

    #[tokio::test]
    async fn test_vial_draw() {
        let text = r#"
mode = "draw"

[device]
vendor_id = 0x3434
product_id = 0x0331

[keyboard]
rows = [[0, 1], [2, 3]]

[[draw]]
layout = "ua"
[[draw.stripes]]
rows = [0]
color = { rgb = [0, 0, 255] }
[[draw.stripes]]
rows = [1]
color = { rgb = [255, 0, 0] }
"#;
        let mock = MockTransport::vial(5);
        let d = dispatcher(text, &mock).await;

        d.apply_layout("ua").await.unwrap();
        let blue = HsvColor::new(170, 255, 255);
        let red = HsvColor::new(0, 255, 255);
        assert_eq!(
            painted(&mock.written()),
            vec![blue, blue, red, red, HsvColor::OFF]
        );

        mock.clear();
        assert_eq!(d.apply_layout("us").await.unwrap(), Outcome::NoMapping);
        assert!(mock.written().is_empty());
    }

    #[tokio::test]
    async fn test_final_write_error_is_returned() {
        let mock = MockTransport::vial(20);
        let d = dispatcher(VIAL_MONO, &mock).await;

        /* write 0 is set-mode, 1 the count query, 2 the first direct set */
        mock.fail_write_at(2);
        let err = d.apply_layout("ru").await.unwrap_err();
        assert!(matches!(err, DeviceError::Batch { start_index: 0, .. }));

        /* the next event still goes through */
        mock.clear();
        assert_eq!(d.apply_layout("ru").await.unwrap(), Outcome::Applied);
    }

    #[tokio::test]
    async fn test_closed_device_fails_final_step() {
        let mock = MockTransport::vial(20);
        let d = dispatcher(VIAL_MONO, &mock).await;
        d.close().await;

        assert!(matches!(d.apply_layout("ru").await, Err(DeviceError::NotOpen)));
    }
}
