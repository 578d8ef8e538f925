//! Device drivers
//!
//! Each supported meter model implements [`DeviceDriver`]. The driver knows
//! the model's command set and frame layout; [`Session`] owns sequencing,
//! failure handling and resource release, so adding a model never touches
//! the session.

mod bm55;

pub use bm55::Bm55Driver;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::protocol::{
    CancelToken, CollectOptions, CollectionReport, ConnectionProvider, FrameDecodeError,
    FrameExchange, ProtocolError, Session,
};
use crate::reading::{BloodPressureReading, GeoLocation, ReadingError, UserSlot};

/// Static description of a meter model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Manufacturer
    pub make: String,
    /// Model name
    pub model: String,
    /// Name shown to users
    pub display_name: String,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x})",
            self.display_name, self.vendor_id, self.product_id
        )
    }
}

/// A decoded reading that belongs to a user slot and can carry provenance
pub trait Measurement {
    /// User slot the reading was stored under
    fn user_slot(&self) -> UserSlot;

    /// Stamp the collecting device and location. Unset arguments are left
    /// alone.
    fn attach_provenance(
        &mut self,
        device_id: Option<&str>,
        location: Option<&GeoLocation>,
    ) -> Result<(), ReadingError>;
}

impl Measurement for BloodPressureReading {
    fn user_slot(&self) -> UserSlot {
        BloodPressureReading::user_slot(self)
    }

    fn attach_provenance(
        &mut self,
        device_id: Option<&str>,
        location: Option<&GeoLocation>,
    ) -> Result<(), ReadingError> {
        if let Some(id) = device_id {
            self.set_device_id(id)?;
        }
        if let Some(location) = location {
            self.set_location(location.clone())?;
        }
        Ok(())
    }
}

/// Command set of one meter model
pub trait DeviceDriver {
    /// Reading type produced by this model
    type Reading: Measurement;

    /// Static description of the model
    fn descriptor(&self) -> DeviceDescriptor;

    /// Start a session on the meter
    fn initialize(&self, link: &mut dyn FrameExchange) -> Result<(), ProtocolError>;

    /// Number of stored slots, including the reserved slot 0
    fn query_count(&self, link: &mut dyn FrameExchange) -> Result<u8, ProtocolError>;

    /// Fetch one stored reading. Transport failures are the outer error,
    /// frame content problems the inner one.
    fn fetch_reading(
        &self,
        link: &mut dyn FrameExchange,
        index: u8,
    ) -> Result<Result<Self::Reading, FrameDecodeError>, ProtocolError>;

    /// End the session on the meter
    fn terminate(&self, link: &mut dyn FrameExchange) -> Result<(), ProtocolError>;

    /// Connect through `provider` and collect the readings selected by
    /// `config`.
    fn get_measurements<P: ConnectionProvider>(
        self,
        provider: &P,
        config: &DeviceConfig,
        cancel: &CancelToken,
    ) -> Result<CollectionReport<Self::Reading>, ProtocolError>
    where
        Self: Sized,
    {
        let transport = provider.connect(&config.usb)?;
        let mut session = Session::new(self, transport, &config.usb);
        session.collect(&CollectOptions::from(config), cancel)
    }
}
