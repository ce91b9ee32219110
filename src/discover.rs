/* `discover` subcommand: find VIA/Vial keyboards, ask each for its VialRGB
 * LED count and print (or write) a starter configuration.
 *
 * Written configs land in `<root>/<vendor>/<model>/<variant>/config.toml`,
 * the tree `config::find_config` searches. */

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::debug;

use crate::config::{CONFIG_FILE, DeviceConfig, Firmware};
use crate::driver::hidraw::{self, InterfaceInfo};
use crate::driver::via::ReportFormat;
use crate::driver::{DeviceError, DeviceSession};

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    #[serde(flatten)]
    pub interface: InterfaceInfo,
    pub vial: bool,
    /* 0 unless VialRGB answered the LED-count query */
    pub led_count: u16,
}

impl DiscoveredDevice {
    pub fn firmware(&self) -> Firmware {
        if self.vial { Firmware::Vial } else { Firmware::Stock }
    }
}

/* Enumerate VIA interfaces and query each one. */
pub async fn discover() -> Result<Vec<DiscoveredDevice>, DeviceError> {
    let interfaces = tokio::task::spawn_blocking(hidraw::enumerate_via_interfaces)
        .await
        .map_err(|e| {
            DeviceError::Hid(hidapi::HidError::HidApiError {
                message: format!("enumeration task failed: {e}"),
            })
        })??;

    let mut found = Vec::with_capacity(interfaces.len());
    for interface in interfaces {
        let led_count = query_led_count(&interface).await;
        found.push(DiscoveredDevice {
            interface,
            vial: led_count.is_some(),
            led_count: led_count.unwrap_or(0),
        });
    }
    Ok(found)
}

/* A keyboard counts as Vial when the LED-count query returns a non-zero
 * count. Any failure, including failure to open, means stock. */
async fn query_led_count(interface: &InterfaceInfo) -> Option<u16> {
    let session = DeviceSession::new(
        DeviceConfig {
            vendor_id: interface.vendor_id,
            product_id: interface.product_id,
            usage_page: interface.usage_page,
            usage: interface.usage,
        },
        ReportFormat::VIAL,
    );

    let result = match session.open().await {
        Ok(()) => session.led_count().await,
        Err(e) => Err(e),
    };
    session.close().await;

    match result {
        Ok(count) => Some(count),
        Err(e) => {
            debug!(
                "{:04x}:{:04x} is not VialRGB: {e}",
                interface.vendor_id, interface.product_id
            );
            None
        }
    }
}

/* Starter config: mono mode, every layout green. Draw mode needs a row
 * table that only the user can map. */
pub fn generate_config(device: &DiscoveredDevice) -> String {
    let info = &device.interface;
    let firmware = match device.firmware() {
        Firmware::Stock => "stock",
        Firmware::Vial => "vial",
    };

    let mut out = String::new();
    let _ = writeln!(out, "# kolor-keyboard configuration");
    let _ = writeln!(out, "# Generated for: {} {}", info.manufacturer, info.product);
    if device.vial {
        let _ = writeln!(out, "# VialRGB detected, {} LEDs", device.led_count);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "firmware = \"{firmware}\"");
    let _ = writeln!(out, "mode = \"mono\"");
    let _ = writeln!(out, "brightness = 200");
    let _ = writeln!(out);
    let _ = writeln!(out, "[device]");
    let _ = writeln!(out, "vendor_id = 0x{:04X}", info.vendor_id);
    let _ = writeln!(out, "product_id = 0x{:04X}", info.product_id);
    let _ = writeln!(out, "usage_page = 0x{:04X}", info.usage_page);
    let _ = writeln!(out, "usage = 0x{:02X}", info.usage);
    let _ = writeln!(out);
    let _ = writeln!(out, "[[colors]]");
    let _ = writeln!(out, "layout = \"*\"");
    let _ = writeln!(out, "color = {{ rgb = [0, 255, 0] }}");
    out
}

const KEYCHRON_VID: u16 = 0x3434;

struct KnownKeyboard {
    vendor_id: u16,
    product_id: u16,
    vendor: &'static str,
    model: &'static str,
    layout: &'static str,
    encoder: bool,
}

const fn keychron(product_id: u16, model: &'static str, layout: &'static str, encoder: bool) -> KnownKeyboard {
    KnownKeyboard {
        vendor_id: KEYCHRON_VID,
        product_id,
        vendor: "keychron",
        model,
        layout,
        encoder,
    }
}

/* Boards whose product string does not name the model or physical layout */
const KNOWN_KEYBOARDS: &[KnownKeyboard] = &[
    keychron(0x0320, "v3", "ansi", false),
    keychron(0x0321, "v3", "iso", false),
    keychron(0x0322, "v3", "jis", false),
    keychron(0x0330, "v3", "ansi", true),
    keychron(0x0331, "v3", "ansi", true),
    keychron(0x0332, "v3", "iso", true),
    keychron(0x0333, "v3", "jis", true),
    keychron(0x0310, "v1", "ansi", false),
    keychron(0x0311, "v1", "iso", false),
    keychron(0x0312, "v1", "jis", false),
    keychron(0x0100, "q1", "ansi", true),
    keychron(0x0101, "q1", "iso", true),
    keychron(0x0200, "q2", "ansi", true),
    keychron(0x0201, "q2", "iso", true),
    keychron(0x0220, "k2", "ansi", false),
];

fn variant_name(layout: &str, encoder: bool) -> String {
    if encoder {
        format!("{layout}_encoder")
    } else {
        layout.to_string()
    }
}

/* Physical layout and encoder presence guessed from the product string. */
fn detect_variant(product: &str) -> String {
    let name = product.to_lowercase();
    let layout = if name.contains("iso") {
        "iso"
    } else if name.contains("jis") {
        "jis"
    } else {
        "ansi"
    };
    let encoder = ["encoder", "knob", "rotary"].iter().any(|w| name.contains(w));
    variant_name(layout, encoder)
}

/* Lowercase, spaces to dashes, only `[a-z0-9_-]` kept, dash runs collapsed. */
fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        let c = if c == ' ' { '-' } else { c };
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
            continue;
        }
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let out = out.trim_matches('-');
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out.to_string()
    }
}

/* `<letter><digits>`, first occurrence */
fn letter_number(name: &str, letter: char) -> Option<String> {
    name.match_indices(letter).find_map(|(i, _)| {
        let digits: String = name[i + letter.len_utf8()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        (!digits.is_empty()).then(|| format!("{letter}{digits}"))
    })
}

/* `<word>`, optionally followed by spaces and a number */
fn word_number(name: &str, word: &str) -> Option<String> {
    let (i, _) = name.match_indices(word).next()?;
    let digits: String = name[i + word.len()..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    Some(format!("{word}{digits}"))
}

/* Model name from a product string such as "Keychron V3" or "Ducky One 2".
 * Series letters are tried in a fixed order before the named lines. */
fn extract_model(product: &str) -> Option<String> {
    let name = product.to_lowercase();
    ['v', 'q', 'k', 's', 'c']
        .into_iter()
        .find_map(|letter| letter_number(&name, letter))
        .or_else(|| ["one", "pro"].into_iter().find_map(|word| word_number(&name, word)))
}

/* (vendor, model, variant) directory names for a device. */
fn keyboard_info(info: &InterfaceInfo) -> (String, String, String) {
    if let Some(known) = KNOWN_KEYBOARDS
        .iter()
        .find(|k| k.vendor_id == info.vendor_id && k.product_id == info.product_id)
    {
        return (
            known.vendor.to_string(),
            known.model.to_string(),
            variant_name(known.layout, known.encoder),
        );
    }

    let vendor = sanitize_name(&info.manufacturer);
    let model = extract_model(&info.product).unwrap_or_else(|| sanitize_name(&info.product));
    (vendor, model, detect_variant(&info.product))
}

/* Where `write_config` puts the config for `device` below `root`. */
fn config_path(device: &DiscoveredDevice, root: &Path) -> PathBuf {
    let (vendor, model, variant) = keyboard_info(&device.interface);
    root.join(vendor).join(model).join(variant).join(CONFIG_FILE)
}

/* Write the starter config below `root`. An existing file is kept unless
 * `force` is set. */
pub fn write_config(device: &DiscoveredDevice, root: &Path, force: bool) -> Result<PathBuf> {
    let path = config_path(device, root);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(&path, generate_config(device))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote {}", path.display());
    Ok(path)
}
