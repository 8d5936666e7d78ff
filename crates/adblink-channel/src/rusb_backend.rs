use std::sync::RwLock;
use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext, TransferType};
use tracing::{debug, info};

use crate::error::{ChannelError, Result};
use crate::usb::{BulkIn, UsbBackend};

/// ADB USB interface class/subclass/protocol triple.
const ADB_CLASS: u8 = 0xff;
const ADB_SUBCLASS: u8 = 0x42;
const ADB_PROTOCOL: u8 = 0x01;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// libusb-backed device access for [`crate::UsbChannel`].
///
/// Owns the opened device handle exclusively; closing tears the handle down
/// and any transfer issued afterwards fails.
pub struct RusbBackend {
    handle: RwLock<Option<DeviceHandle<GlobalContext>>>,
    interface: u8,
    endpoint_in: u8,
    endpoint_out: u8,
    write_timeout: Duration,
}

impl RusbBackend {
    /// Open the first connected device that exposes an ADB interface.
    pub fn open_first() -> Result<Self> {
        let devices = rusb::devices().map_err(usb_error)?;
        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(_) => continue,
            };
            if let Ok(backend) = Self::open_device(&device) {
                info!(
                    vendor = %format_args!("{:04x}", descriptor.vendor_id()),
                    product = %format_args!("{:04x}", descriptor.product_id()),
                    "opened adb usb device"
                );
                return Ok(backend);
            }
        }
        Err(ChannelError::MissingEndpoints)
    }

    /// Open a specific device by vendor/product id.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self> {
        let devices = rusb::devices().map_err(usb_error)?;
        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(_) => continue,
            };
            if descriptor.vendor_id() == vendor_id && descriptor.product_id() == product_id {
                return Self::open_device(&device);
            }
        }
        Err(ChannelError::MissingEndpoints)
    }

    fn open_device(device: &rusb::Device<GlobalContext>) -> Result<Self> {
        let config = device.active_config_descriptor().map_err(usb_error)?;

        // Look for the adb interface and its bulk endpoint pair.
        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                if descriptor.class_code() != ADB_CLASS
                    || descriptor.sub_class_code() != ADB_SUBCLASS
                    || descriptor.protocol_code() != ADB_PROTOCOL
                {
                    continue;
                }

                let mut endpoint_in = None;
                let mut endpoint_out = None;
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match endpoint.direction() {
                        rusb::Direction::In => endpoint_in = Some(endpoint.address()),
                        rusb::Direction::Out => endpoint_out = Some(endpoint.address()),
                    }
                }

                let (Some(endpoint_in), Some(endpoint_out)) = (endpoint_in, endpoint_out) else {
                    continue;
                };

                let mut handle = device.open().map_err(usb_error)?;
                let _ = handle.set_auto_detach_kernel_driver(true);
                handle
                    .claim_interface(descriptor.interface_number())
                    .map_err(usb_error)?;

                debug!(
                    interface = descriptor.interface_number(),
                    endpoint_in, endpoint_out, "claimed adb interface"
                );

                return Ok(Self {
                    handle: RwLock::new(Some(handle)),
                    interface: descriptor.interface_number(),
                    endpoint_in,
                    endpoint_out,
                    write_timeout: DEFAULT_WRITE_TIMEOUT,
                });
            }
        }

        Err(ChannelError::MissingEndpoints)
    }
}

impl UsbBackend for RusbBackend {
    fn bulk_in(&self, buf: &mut [u8]) -> Result<BulkIn> {
        let guard = self.handle.read().expect("usb handle lock poisoned");
        let handle = guard.as_ref().ok_or(ChannelError::Closed)?;

        // Zero duration means no timeout: the receive loop parks here until
        // the device produces data.
        match handle.read_bulk(self.endpoint_in, buf, Duration::ZERO) {
            Ok(n) => Ok(BulkIn::Read(n)),
            Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => Ok(BulkIn::Mismatched),
            Err(err) => Err(ChannelError::Transfer(err.to_string())),
        }
    }

    fn bulk_out(&self, buf: &[u8]) -> Result<usize> {
        let guard = self.handle.read().expect("usb handle lock poisoned");
        let handle = guard.as_ref().ok_or(ChannelError::Closed)?;

        handle
            .write_bulk(self.endpoint_out, buf, self.write_timeout)
            .map_err(|err| ChannelError::Transfer(err.to_string()))
    }

    fn close_device(&self) {
        let mut guard = self.handle.write().expect("usb handle lock poisoned");
        if let Some(mut handle) = guard.take() {
            let _ = handle.release_interface(self.interface);
            debug!("released adb usb device");
        }
    }
}
