//! Transport abstraction
//!
//! A transport is a claimed USB interface that can push command frames out
//! through the control endpoint and pull response frames in through a bulk
//! endpoint. The session only ever talks to this trait, so the same state
//! machine runs against real hardware and against the simulated meter.

use std::time::Duration;

use crate::config::UsbSettings;

use super::ProtocolError;

/// Setup packet fields for a control OUT transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    /// bmRequestType (33 = class, interface recipient, host-to-device)
    pub request_type: u8,
    /// bRequest (0x09 = HID SET_REPORT)
    pub request: u8,
    /// wValue (report type 2 = output, report ID 9)
    pub value: u16,
    /// wIndex (interface)
    pub index: u16,
}

impl ControlSetup {
    /// Setup used for every BM55 command frame
    pub const SET_REPORT: ControlSetup = ControlSetup {
        request_type: 33,
        request: 0x09,
        value: (2 << 8) | 9,
        index: 0,
    };
}

impl Default for ControlSetup {
    fn default() -> Self {
        Self::SET_REPORT
    }
}

/// A claimed device interface
pub trait Transport {
    /// Send `data` in a control OUT transfer. Returns the number of bytes sent.
    fn send_control(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, ProtocolError>;

    /// Fill `buf` from a bulk IN transfer on `endpoint`. Returns the number of
    /// bytes received.
    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ProtocolError>;

    /// Release the interface claim and close the device.
    ///
    /// Must be idempotent. Transfers after release fail.
    fn release(&mut self) -> Result<(), ProtocolError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_control(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, ProtocolError> {
        (**self).send_control(setup, data, timeout)
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ProtocolError> {
        (**self).read_bulk(endpoint, buf, timeout)
    }

    fn release(&mut self) -> Result<(), ProtocolError> {
        (**self).release()
    }
}

/// Hands out claimed transports for a vendor/product pair.
///
/// Each call to `connect` returns a freshly claimed transport that shares no
/// state with earlier ones.
pub trait ConnectionProvider {
    /// Transport produced by this provider
    type Transport: Transport;

    /// Find the device described by `settings`, open it and claim its
    /// interface.
    fn connect(&self, settings: &UsbSettings) -> Result<Self::Transport, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_report_setup() {
        let setup = ControlSetup::default();
        assert_eq!(setup.request_type, 0x21);
        assert_eq!(setup.request, 0x09);
        assert_eq!(setup.value, 0x0209);
        assert_eq!(setup.value, 521);
        assert_eq!(setup.index, 0);
    }
}
