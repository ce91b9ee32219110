/* TOML configuration: device identity, firmware, mode and the per-layout
 * appearance table.
 *
 * The file is parsed into a loose `RawConfig` and then validated into
 * `Config`, whose `Lighting` variant only carries the fields that matter for
 * the selected firmware/mode pair. Nothing past this module has to cope
 * with an invalid combination. */

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

use crate::color::{HsvColor, RgbColor};
use crate::driver::hidraw::{VIA_USAGE, VIA_USAGE_PAGE};
use crate::driver::via::ReportFormat;

/* Layout code that matches any layout without an exact entry */
pub const WILDCARD_LAYOUT: &str = "*";

pub const DEFAULT_SPEED: u8 = 128;

const APP_DIR: &str = "kolor-keyboard";
const KEYBOARDS_DIR: &str = "keyboards";
pub const CONFIG_FILE: &str = "config.toml";
const LOCAL_CONFIG: &str = "kolor-keyboard.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("config file not found (searched {0})")]
    NotFound(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    /* QMK with VIA: RGB Matrix value commands only */
    Stock,
    /* Vial with VialRGB: adds direct per-LED control */
    #[default]
    Vial,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /* One color for the whole keyboard */
    #[default]
    Mono,
    /* Per-LED stripes */
    #[serde(alias = "flags")]
    Draw,
}

/* HID interface identity. */
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default = "default_usage_page")]
    pub usage_page: u16,
    #[serde(default = "default_usage")]
    pub usage: u16,
}

fn default_usage_page() -> u16 {
    VIA_USAGE_PAGE
}

fn default_usage() -> u16 {
    VIA_USAGE
}

/* A color entry: exactly one of `rgb = [r, g, b]` or `hsv = [h, s, v]`. */
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ColorSpec {
    rgb: Option<[u8; 3]>,
    hsv: Option<[u8; 3]>,
}

impl TryFrom<ColorSpec> for RgbColor {
    type Error = String;

    fn try_from(spec: ColorSpec) -> Result<Self, Self::Error> {
        match (spec.rgb, spec.hsv) {
            (Some([r, g, b]), None) => Ok(RgbColor::new(r, g, b)),
            (None, Some([h, s, v])) => Ok(HsvColor::new(h, s, v).to_rgb()),
            (Some(_), Some(_)) => Err("cannot specify both rgb and hsv in one color".to_string()),
            (None, None) => Err("color must have either 'rgb' or 'hsv'".to_string()),
        }
    }
}

fn deserialize_color<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RgbColor, D::Error> {
    let spec = ColorSpec::deserialize(deserializer)?;
    RgbColor::try_from(spec).map_err(serde::de::Error::custom)
}

/* Layout to color, for mono mode. */
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColorMapping {
    pub layout: String,
    #[serde(deserialize_with = "deserialize_color")]
    pub color: RgbColor,
}

/* Physical LED topology: row index to the LED indices in that row. */
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyboardConfig {
    pub rows: Vec<Vec<u16>>,
}

/* Layout to flag, for draw mode. */
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagMapping {
    pub layout: String,
    pub stripes: Vec<FlagStripe>,
}

/* One band of a flag. Explicit `leds` win over `rows` when both are set. */
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagStripe {
    #[serde(default)]
    pub rows: Vec<usize>,
    #[serde(default)]
    pub leds: Vec<u16>,
    #[serde(deserialize_with = "deserialize_color")]
    pub color: RgbColor,
}

/* File layout as written by the user. */
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    device: DeviceConfig,
    #[serde(default)]
    firmware: Firmware,
    #[serde(default)]
    mode: Mode,
    brightness: Option<u8>,
    speed: Option<u8>,
    report_size: Option<usize>,
    #[serde(default)]
    colors: Vec<ColorMapping>,
    keyboard: Option<KeyboardConfig>,
    #[serde(default)]
    draw: Vec<FlagMapping>,
}

/* Valid firmware/mode combinations and the data each one needs. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lighting {
    /* Global RGB Matrix color */
    StockMono { colors: Vec<ColorMapping> },
    /* Every LED set to the same color in direct mode */
    VialMono { colors: Vec<ColorMapping> },
    /* Per-LED flags in direct mode */
    VialDraw {
        keyboard: KeyboardConfig,
        drawings: Vec<FlagMapping>,
    },
}

/* Validated configuration, read-only after load. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub device: DeviceConfig,
    pub brightness: Option<u8>,
    pub speed: u8,
    pub report: ReportFormat,
    pub lighting: Lighting,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config text from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        Self::try_from(raw)
    }

    pub fn firmware(&self) -> Firmware {
        match self.lighting {
            Lighting::StockMono { .. } => Firmware::Stock,
            Lighting::VialMono { .. } | Lighting::VialDraw { .. } => Firmware::Vial,
        }
    }

    pub fn mode(&self) -> Mode {
        match self.lighting {
            Lighting::StockMono { .. } | Lighting::VialMono { .. } => Mode::Mono,
            Lighting::VialDraw { .. } => Mode::Draw,
        }
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let d = &raw.device;
        if d.vendor_id == 0 || d.product_id == 0 {
            return Err(invalid("device vendor_id and product_id are required"));
        }
        if d.usage_page == 0 || d.usage == 0 {
            return Err(invalid("device usage_page and usage must be non-zero"));
        }

        let report = match raw.report_size {
            Some(size) => ReportFormat::new(size)
                .ok_or_else(|| invalid(format!("report_size {size} out of range (8..=64)")))?,
            None => match raw.firmware {
                Firmware::Stock => ReportFormat::STOCK,
                Firmware::Vial => ReportFormat::VIAL,
            },
        };

        let lighting = match (raw.firmware, raw.mode) {
            (Firmware::Stock, Mode::Draw) => {
                return Err(invalid(
                    "draw mode requires vial firmware (stock firmware only supports mono mode)",
                ));
            }
            (firmware, Mode::Mono) => {
                if raw.colors.is_empty() {
                    return Err(invalid("at least one color mapping is required for mono mode"));
                }
                match firmware {
                    Firmware::Stock => Lighting::StockMono { colors: raw.colors },
                    Firmware::Vial => Lighting::VialMono { colors: raw.colors },
                }
            }
            (Firmware::Vial, Mode::Draw) => {
                let keyboard = raw.keyboard.unwrap_or_default();
                validate_drawings(&keyboard, &raw.draw)?;
                Lighting::VialDraw {
                    keyboard,
                    drawings: raw.draw,
                }
            }
        };

        Ok(Self {
            device: raw.device,
            brightness: raw.brightness,
            speed: raw.speed.unwrap_or(DEFAULT_SPEED),
            report,
            lighting,
        })
    }
}

fn validate_drawings(keyboard: &KeyboardConfig, drawings: &[FlagMapping]) -> Result<(), ConfigError> {
    if keyboard.rows.is_empty() {
        return Err(invalid("keyboard.rows is required for draw mode"));
    }
    if drawings.is_empty() {
        return Err(invalid("at least one draw mapping is required for draw mode"));
    }

    let num_rows = keyboard.rows.len();
    for (i, flag) in drawings.iter().enumerate() {
        if flag.stripes.is_empty() {
            return Err(invalid(format!(
                "draw[{i}] ({}): at least one stripe is required",
                flag.layout
            )));
        }
        for (j, stripe) in flag.stripes.iter().enumerate() {
            if stripe.rows.is_empty() && stripe.leds.is_empty() {
                return Err(invalid(format!(
                    "draw[{i}] ({}) stripe[{j}]: needs rows or leds",
                    flag.layout
                )));
            }
            if let Some(&row) = stripe.rows.iter().find(|&&row| row >= num_rows) {
                return Err(invalid(format!(
                    "draw[{i}] ({}) stripe[{j}]: invalid row {row} (keyboard has {num_rows} rows)",
                    flag.layout
                )));
            }
        }
    }
    Ok(())
}

/* Locate a config file when none was given on the command line.
 *
 * Order: `./kolor-keyboard.toml`, `<config dir>/kolor-keyboard/config.toml`,
 * then the first `<config dir>/kolor-keyboard/keyboards/<vendor>/<model>/<variant>/config.toml`. */
pub fn find_config() -> Result<PathBuf, ConfigError> {
    let mut searched = vec![PathBuf::from(LOCAL_CONFIG)];
    let app_dir = app_config_dir();
    if let Some(dir) = &app_dir {
        searched.push(dir.join(CONFIG_FILE));
    }

    if let Some(found) = searched.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }

    if let Some(dir) = &app_dir {
        let keyboards = dir.join(KEYBOARDS_DIR);
        if let Some(found) = find_in_keyboards_tree(&keyboards) {
            return Ok(found);
        }
        searched.push(keyboards.join("*/*/*/config.toml"));
    }

    let list: Vec<String> = searched.iter().map(|p| p.display().to_string()).collect();
    Err(ConfigError::NotFound(list.join(", ")))
}

fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}

/* Per-keyboard config tree searched by `find_config` and filled by
 * `discover --global`. */
pub fn keyboards_dir() -> Option<PathBuf> {
    app_config_dir().map(|dir| dir.join(KEYBOARDS_DIR))
}

/* Walk `<vendor>/<model>/<variant>/config.toml`, first hit in name order. */
pub fn find_in_keyboards_tree(root: &Path) -> Option<PathBuf> {
    fn subdirs(dir: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        dirs
    }

    subdirs(root)
        .iter()
        .flat_map(|vendor| subdirs(vendor))
        .flat_map(|model| subdirs(&model))
        .map(|variant| variant.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONO: &str = r#"
firmware = "vial"
mode = "mono"
brightness = 200
speed = 64

[device]
vendor_id = 0x3434
product_id = 0x0331
usage_page = 0xFF60
usage = 0x61

[[colors]]
layout = "ru"
color = { rgb = [255, 0, 0] }

[[colors]]
layout = "us"
color = { hsv = [170, 255, 255] }

[[colors]]
layout = "*"
color = { rgb = [255, 255, 255] }
"#;

    const DRAW: &str = r#"
mode = "draw"

[device]
vendor_id = 0x3434
product_id = 0x0331

[keyboard]
rows = [[0, 1, 2], [3, 4, 5], [6, 7]]

[[draw]]
layout = "ua"
[[draw.stripes]]
rows = [0, 1]
color = { rgb = [0, 87, 183] }
[[draw.stripes]]
rows = [2]
color = { rgb = [255, 215, 0] }
"#;

    #[test]
    fn test_load_mono() {
        let cfg = Config::from_toml_str(MONO).unwrap();

        assert_eq!(cfg.device.vendor_id, 0x3434);
        assert_eq!(cfg.device.product_id, 0x0331);
        assert_eq!(cfg.firmware(), Firmware::Vial);
        assert_eq!(cfg.mode(), Mode::Mono);
        assert_eq!(cfg.brightness, Some(200));
        assert_eq!(cfg.speed, 64);
        assert_eq!(cfg.report, ReportFormat::VIAL);

        let Lighting::VialMono { colors } = &cfg.lighting else {
            panic!("expected vial mono, got {:?}", cfg.lighting);
        };
        assert_eq!(colors.len(), 3);
        assert_eq!(colors[0].color, RgbColor::new(255, 0, 0));
        /* hsv input is converted to rgb at load time */
        assert_eq!(colors[1].color, RgbColor::new(0, 0, 255));
    }

    #[test]
    fn test_load_draw_with_defaults() {
        let cfg = Config::from_toml_str(DRAW).unwrap();

        assert_eq!(cfg.mode(), Mode::Draw);
        assert_eq!(cfg.firmware(), Firmware::Vial);
        assert_eq!(cfg.device.usage_page, 0xFF60);
        assert_eq!(cfg.device.usage, 0x61);
        assert_eq!(cfg.speed, DEFAULT_SPEED);
        assert_eq!(cfg.brightness, None);

        let Lighting::VialDraw { keyboard, drawings } = &cfg.lighting else {
            panic!("expected vial draw");
        };
        assert_eq!(keyboard.rows.len(), 3);
        assert_eq!(drawings[0].stripes.len(), 2);
        assert_eq!(drawings[0].stripes[1].rows, vec![2]);
    }

    #[test]
    fn test_flags_alias_for_draw() {
        let text = DRAW.replace(r#"mode = "draw""#, r#"mode = "flags""#);
        assert_eq!(Config::from_toml_str(&text).unwrap().mode(), Mode::Draw);
    }

    #[test]
    fn test_stock_defaults_to_64_byte_reports() {
        let text = MONO.replace(r#"firmware = "vial""#, r#"firmware = "stock""#);
        let cfg = Config::from_toml_str(&text).unwrap();
        assert_eq!(cfg.firmware(), Firmware::Stock);
        assert_eq!(cfg.report, ReportFormat::STOCK);
    }

    #[test]
    fn test_explicit_report_size() {
        let text = format!("report_size = 48\n{MONO}");
        let cfg = Config::from_toml_str(&text).unwrap();
        assert_eq!(cfg.report.size(), 48);
        assert_eq!(cfg.report.max_leds_per_packet(), 14);

        let text = format!("report_size = 4\n{MONO}");
        assert!(matches!(Config::from_toml_str(&text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_draw_with_stock_rejected() {
        let text = format!("firmware = \"stock\"\n{DRAW}");
        let err = Config::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("requires vial"), "{err}");
    }

    #[test]
    fn test_row_out_of_range_rejected() {
        let text = DRAW.replace("rows = [2]", "rows = [3]");
        let err = Config::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("invalid row 3"), "{err}");
    }

    #[test]
    fn test_stripe_without_target_rejected() {
        let text = DRAW.replace("rows = [2]\n", "");
        assert!(matches!(Config::from_toml_str(&text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_draw_requires_rows_and_mappings() {
        let text = DRAW.replace("rows = [[0, 1, 2], [3, 4, 5], [6, 7]]", "rows = []");
        assert!(matches!(Config::from_toml_str(&text), Err(ConfigError::Invalid(_))));

        let no_draw = DRAW.split("[[draw]]").next().unwrap();
        assert!(matches!(Config::from_toml_str(no_draw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_device_ids_rejected() {
        let text = MONO.replace("vendor_id = 0x3434", "vendor_id = 0");
        assert!(matches!(Config::from_toml_str(&text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_mono_requires_colors() {
        let text = MONO.split("[[colors]]").next().unwrap();
        assert!(matches!(Config::from_toml_str(text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_color_needs_exactly_one_space() {
        let both = MONO.replace(
            "color = { rgb = [255, 0, 0] }",
            "color = { rgb = [255, 0, 0], hsv = [0, 255, 255] }",
        );
        let err = Config::from_toml_str(&both).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("both rgb and hsv"), "{err}");

        let neither = MONO.replace("color = { rgb = [255, 0, 0] }", "color = {}");
        assert!(matches!(Config::from_toml_str(&neither), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let text = format!("colour = 1\n{MONO}");
        assert!(matches!(Config::from_toml_str(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/kolor-keyboard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join(format!("kolor-keyboard-test-{}.toml", std::process::id()));
        std::fs::write(&path, MONO).unwrap();
        let cfg = Config::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.unwrap().mode(), Mode::Mono);
    }

    #[test]
    fn test_keyboards_tree_search() {
        let root = std::env::temp_dir().join(format!("kolor-keyboard-tree-{}", std::process::id()));
        let variant = root.join("keychron/v3/ansi_encoder");
        std::fs::create_dir_all(&variant).unwrap();
        std::fs::write(variant.join("config.toml"), MONO).unwrap();

        let found = find_in_keyboards_tree(&root);
        std::fs::remove_dir_all(&root).unwrap();
        assert_eq!(found, Some(variant.join("config.toml")));
    }
}
