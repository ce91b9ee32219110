/* hidapi-backed transport and interface enumeration.
 *
 * A VIA keyboard exposes several HID interfaces under one VID/PID; only the
 * raw-HID one (usage page 0xFF60, usage 0x61 by default) speaks the lighting
 * protocol, so interfaces are matched on all four identifiers. */

use std::collections::HashSet;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use serde::Serialize;
use tracing::debug;

use super::{DeviceError, HidTransport};
use crate::config::DeviceConfig;

/* Raw-HID interface advertised by VIA/Vial firmware */
pub const VIA_USAGE_PAGE: u16 = 0xFF60;
pub const VIA_USAGE: u16 = 0x61;

/* Unnumbered reports are sent with a leading zero report ID */
const REPORT_ID: u8 = 0x00;

pub struct HidrawTransport {
    device: HidDevice,
    path: String,
}

impl HidTransport for HidrawTransport {
    fn name(&self) -> &str {
        &self.path
    }

    fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError> {
        let mut buf = Vec::with_capacity(report.len() + 1);
        buf.push(REPORT_ID);
        buf.extend_from_slice(report);

        self.device.write(&buf)?;
        debug!("TX {} bytes: {:02x?}", report.len(), report);
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let n = self.device.read_timeout(buf, millis)?;
        if n > 0 {
            debug!("RX {} bytes: {:02x?}", n, &buf[..n]);
        }
        Ok(n)
    }
}

/* Open the interface matching vendor, product, usage page and usage. */
pub fn open_interface(device: &DeviceConfig) -> Result<HidrawTransport, DeviceError> {
    let api = HidApi::new()?;

    let info = api
        .device_list()
        .find(|info| {
            info.vendor_id() == device.vendor_id
                && info.product_id() == device.product_id
                && info.usage_page() == device.usage_page
                && info.usage() == device.usage
        })
        .ok_or(DeviceError::NotFound {
            vid: device.vendor_id,
            pid: device.product_id,
            usage_page: device.usage_page,
            usage: device.usage,
        })?;

    let path = info.path().to_string_lossy().into_owned();
    debug!(
        "Opening {:04x}:{:04x} interface at {}",
        device.vendor_id, device.product_id, path
    );
    let device = info.open_device(&api)?;

    Ok(HidrawTransport { device, path })
}

/* A VIA raw-HID interface found during enumeration. */
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
    pub manufacturer: String,
    pub product: String,
    pub path: String,
}

/* List every VIA raw-HID interface, one entry per VID:PID. */
pub fn enumerate_via_interfaces() -> Result<Vec<InterfaceInfo>, DeviceError> {
    let api = HidApi::new()?;
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for info in api.device_list() {
        if info.usage_page() != VIA_USAGE_PAGE || info.usage() != VIA_USAGE {
            continue;
        }
        if !seen.insert((info.vendor_id(), info.product_id())) {
            continue;
        }

        found.push(InterfaceInfo {
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            usage_page: info.usage_page(),
            usage: info.usage(),
            manufacturer: info.manufacturer_string().unwrap_or_default().to_string(),
            product: info.product_string().unwrap_or_default().to_string(),
            path: info.path().to_string_lossy().into_owned(),
        });
    }

    debug!("Found {} VIA interface(s)", found.len());
    Ok(found)
}
