/* VIA / Vial raw-HID lighting protocol.
 *
 * Every report is a fixed-size buffer, zero padded. VIA's RGB Matrix value
 * commands address the firmware's global effect/color/brightness; the VialRGB
 * commands (0x41..0x43 on the same SET/GET opcodes) switch the matrix into
 * direct mode and stream per-LED HSV triples.
 *
 * The report size differs between firmware builds, so every builder hangs off
 * a `ReportFormat` that also derives how many LEDs fit into one direct-set
 * report. */

use crate::color::HsvColor;

/* VIA lighting opcodes */
pub const CMD_SET_VALUE: u8 = 0x07;
pub const CMD_GET_VALUE: u8 = 0x08;

/* Reply byte 0 for commands the firmware does not handle */
pub const CMD_UNHANDLED: u8 = 0xFF;

/* RGB Matrix channel and its value ids */
pub const CHANNEL_RGB_MATRIX: u8 = 0x03;
pub const RGB_MATRIX_BRIGHTNESS: u8 = 0x01;
pub const RGB_MATRIX_EFFECT: u8 = 0x02;
pub const RGB_MATRIX_COLOR: u8 = 0x04;

/* RGB Matrix solid color effect */
pub const EFFECT_SOLID_COLOR: u8 = 0x01;

/* VialRGB sub-commands */
pub const VIALRGB_SET_MODE: u8 = 0x41;
pub const VIALRGB_DIRECT_FASTSET: u8 = 0x42;
pub const VIALRGB_GET_NUMBER_LEDS: u8 = 0x43;

/* VialRGB effect id for host-driven per-LED colors */
pub const VIALRGB_EFFECT_DIRECT: u16 = 1;

/* Report sizes seen in the wild */
pub const STOCK_REPORT_SIZE: usize = 64;
pub const VIAL_REPORT_SIZE: usize = 32;

/* Direct-set header: opcode, sub-command, start (u16 LE), count */
const DIRECT_HEADER_LEN: usize = 5;

/* The set-mode report is the longest fixed layout (8 bytes) */
const MIN_REPORT_SIZE: usize = 8;
const MAX_REPORT_SIZE: usize = 64;

/* Report geometry for one protocol variant. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportFormat {
    size: usize,
}

impl ReportFormat {
    pub const STOCK: Self = Self {
        size: STOCK_REPORT_SIZE,
    };
    pub const VIAL: Self = Self {
        size: VIAL_REPORT_SIZE,
    };

    /* Returns `None` for sizes that cannot carry the set-mode layout or
     * exceed a full-speed interrupt report. */
    pub fn new(size: usize) -> Option<Self> {
        (MIN_REPORT_SIZE..=MAX_REPORT_SIZE)
            .contains(&size)
            .then_some(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /* LEDs per direct-set report: `(size - 5) / 3`. */
    pub fn max_leds_per_packet(&self) -> usize {
        (self.size - DIRECT_HEADER_LEN) / 3
    }

    fn blank(&self) -> Vec<u8> {
        vec![0u8; self.size]
    }

    fn rgb_matrix_set(&self, value_id: u8, args: &[u8]) -> Vec<u8> {
        let mut report = self.blank();
        report[0] = CMD_SET_VALUE;
        report[1] = CHANNEL_RGB_MATRIX;
        report[2] = value_id;
        report[3..3 + args.len()].copy_from_slice(args);
        report
    }

    /* `[0x07, 0x03, 0x02, effect]` */
    pub fn build_set_effect(&self, effect: u8) -> Vec<u8> {
        self.rgb_matrix_set(RGB_MATRIX_EFFECT, &[effect])
    }

    /* `[0x07, 0x03, 0x04, hue, sat]`. Value is controlled by brightness. */
    pub fn build_set_color(&self, hue: u8, sat: u8) -> Vec<u8> {
        self.rgb_matrix_set(RGB_MATRIX_COLOR, &[hue, sat])
    }

    /* `[0x07, 0x03, 0x01, brightness]` */
    pub fn build_set_brightness(&self, brightness: u8) -> Vec<u8> {
        self.rgb_matrix_set(RGB_MATRIX_BRIGHTNESS, &[brightness])
    }

    /* `[0x07, 0x41, mode_lo, mode_hi, speed, h, s, v]` */
    pub fn build_vial_set_mode(&self, mode: u16, speed: u8, color: HsvColor) -> Vec<u8> {
        let mut report = self.blank();
        let [mode_lo, mode_hi] = mode.to_le_bytes();
        report[..8].copy_from_slice(&[
            CMD_SET_VALUE,
            VIALRGB_SET_MODE,
            mode_lo,
            mode_hi,
            speed,
            color.h,
            color.s,
            color.v,
        ]);
        report
    }

    /* `[0x07, 0x42, start_lo, start_hi, count, (h, s, v)...]`
     *
     * Writes at most `max_leds_per_packet()` triples; anything beyond that
     * is left out and the count byte reports what was actually written.
     * Splitting longer runs is the caller's job. */
    pub fn build_direct_set(&self, start_index: u16, colors: &[HsvColor]) -> Vec<u8> {
        let mut report = self.blank();
        let count = colors
            .len()
            .min(self.max_leds_per_packet())
            .min(usize::from(u8::MAX));
        let [start_lo, start_hi] = start_index.to_le_bytes();

        report[0] = CMD_SET_VALUE;
        report[1] = VIALRGB_DIRECT_FASTSET;
        report[2] = start_lo;
        report[3] = start_hi;
        report[4] = count as u8;

        for (slot, color) in report[DIRECT_HEADER_LEN..]
            .chunks_exact_mut(3)
            .zip(&colors[..count])
        {
            slot.copy_from_slice(&[color.h, color.s, color.v]);
        }
        report
    }

    /* `[0x08, 0x43]` */
    pub fn build_get_led_count(&self) -> Vec<u8> {
        let mut report = self.blank();
        report[0] = CMD_GET_VALUE;
        report[1] = VIALRGB_GET_NUMBER_LEDS;
        report
    }
}

/* LED count from a `VIALRGB_GET_NUMBER_LEDS` reply: bytes 2..=3, little
 * endian. A reply shorter than four bytes yields 0. */
pub fn parse_led_count_response(response: &[u8]) -> u16 {
    match response {
        [_, _, lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        _ => 0,
    }
}
