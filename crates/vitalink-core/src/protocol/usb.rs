//! USB transport
//!
//! Talks to real hardware through `nusb`. Transfers are issued as futures and
//! driven to completion on a private current-thread runtime so each one can be
//! bounded by the session timeout; dropping a timed-out transfer cancels it.

use std::time::Duration;

use nusb::transfer::{ControlOut, ControlType, Recipient, RequestBuffer};
use nusb::{Device, Interface};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::{ConnectionProvider, ControlSetup, ProtocolError, Transport};
use crate::config::UsbSettings;

/// Decode the type and recipient fields of a `bmRequestType` byte
fn split_request_type(request_type: u8) -> Result<(ControlType, Recipient), ProtocolError> {
    let control_type = match (request_type >> 5) & 0x03 {
        0 => ControlType::Standard,
        1 => ControlType::Class,
        2 => ControlType::Vendor,
        _ => {
            return Err(ProtocolError::Transfer(format!(
                "reserved request type {request_type:#04x}"
            )))
        }
    };
    let recipient = match request_type & 0x1F {
        0 => Recipient::Device,
        1 => Recipient::Interface,
        2 => Recipient::Endpoint,
        3 => Recipient::Other,
        _ => {
            return Err(ProtocolError::Transfer(format!(
                "reserved recipient in request type {request_type:#04x}"
            )))
        }
    };
    Ok((control_type, recipient))
}

/// A claimed interface on a real device
pub struct UsbTransport {
    interface: Option<Interface>,
    device: Option<Device>,
    runtime: Runtime,
}

impl UsbTransport {
    /// Find the device, open it and claim the configured interface
    pub fn open(settings: &UsbSettings) -> Result<Self, ProtocolError> {
        info!(
            "Searching for USB device {:04x}:{:04x}...",
            settings.vendor_id, settings.product_id
        );
        let device_info = nusb::list_devices()
            .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?
            .find(|d| d.vendor_id() == settings.vendor_id && d.product_id() == settings.product_id)
            .ok_or(ProtocolError::DeviceNotFound {
                vendor_id: settings.vendor_id,
                product_id: settings.product_id,
            })?;

        info!(
            "Found device on bus {} addr {}",
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .map_err(|e| ProtocolError::ConnectionFailed(format!("open failed: {e}")))?;
        let interface = device
            .detach_and_claim_interface(settings.interface_number)
            .map_err(|e| {
                ProtocolError::ConnectionFailed(format!(
                    "claim of interface {} failed: {e}",
                    settings.interface_number
                ))
            })?;
        info!("Interface {} claimed", settings.interface_number);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| ProtocolError::ConnectionFailed(format!("runtime: {e}")))?;

        Ok(Self {
            interface: Some(interface),
            device: Some(device),
            runtime,
        })
    }

    fn interface(&self) -> Result<&Interface, ProtocolError> {
        self.interface
            .as_ref()
            .ok_or_else(|| ProtocolError::Transfer("interface released".to_string()))
    }
}

impl Transport for UsbTransport {
    fn send_control(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, ProtocolError> {
        let (control_type, recipient) = split_request_type(setup.request_type)?;
        let interface = self.interface()?;
        let transfer = interface.control_out(ControlOut {
            control_type,
            recipient,
            request: setup.request,
            value: setup.value,
            index: setup.index,
            data,
        });

        let completion = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, transfer).await })
            .map_err(|_| ProtocolError::Timeout)?;
        let response = completion
            .into_result()
            .map_err(|e| ProtocolError::Transfer(e.to_string()))?;
        Ok(response.actual_length())
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ProtocolError> {
        let interface = self.interface()?;
        let transfer = interface.bulk_in(endpoint, RequestBuffer::new(buf.len()));

        let completion = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, transfer).await })
            .map_err(|_| ProtocolError::Timeout)?;
        let data = completion
            .into_result()
            .map_err(|e| ProtocolError::Transfer(e.to_string()))?;

        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn release(&mut self) -> Result<(), ProtocolError> {
        // Dropping the interface releases the claim
        if self.interface.take().is_some() {
            debug!("USB interface released");
        }
        self.device = None;
        Ok(())
    }
}

/// Opens real devices through `nusb`
#[derive(Debug, Clone, Copy, Default)]
pub struct UsbConnectionProvider;

impl ConnectionProvider for UsbConnectionProvider {
    type Transport = UsbTransport;

    fn connect(&self, settings: &UsbSettings) -> Result<UsbTransport, ProtocolError> {
        UsbTransport::open(settings)
    }
}
