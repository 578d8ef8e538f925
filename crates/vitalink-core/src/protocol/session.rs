//! Session management
//!
//! Drives one complete exchange with a meter: initialize, query the number of
//! stored readings, fetch each reading in order, and run the shutdown
//! handshake. A session owns its transport and releases it on every exit
//! path, including errors and drop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CommandBuilder, ControlSetup, FrameDecodeError, ProtocolError, RawFrame, Transport, FRAME_LEN,
};
use crate::config::{DecodeFailurePolicy, DeviceConfig, UsbSettings};
use crate::device::{DeviceDescriptor, DeviceDriver, Measurement};
use crate::filter::filter_by_user;
use crate::reading::{GeoLocation, UserSlot};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Transport claimed, nothing sent yet
    Disconnected,
    /// Meter acknowledged the initialize command
    Initialized,
    /// Number of stored reading slots is known
    CountKnown {
        /// Slots reported by the meter, including slot 0
        count: u8,
    },
    /// Reading `index` has been fetched
    Reading {
        /// Last slot fetched
        index: u8,
        /// Slots reported by the meter
        count: u8,
    },
    /// Shutdown handshake completed
    Terminated,
    /// A fatal error ended the session
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Initialized => write!(f, "initialized"),
            SessionState::CountKnown { count } => write!(f, "count known ({count})"),
            SessionState::Reading { index, count } => write!(f, "reading {index}/{count}"),
            SessionState::Terminated => write!(f, "terminated"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Cooperative cancellation flag shared with the caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running collection to stop after the current exchange
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancelToken::cancel`] has been called on any clone
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A stored reading that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedReading {
    /// Device slot index
    pub index: u8,
    /// Why it was skipped
    #[serde(serialize_with = "serialize_display")]
    pub error: FrameDecodeError,
}

fn serialize_display<S: serde::Serializer>(
    value: &FrameDecodeError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Outcome of a full collection
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport<R> {
    /// Unique ID of the session that produced this report
    pub session_id: Uuid,
    /// Device the readings came from
    pub device: DeviceDescriptor,
    /// User slot the readings were filtered for
    pub user: UserSlot,
    /// Slot count reported by the meter (includes reserved slot 0)
    pub slot_count: u8,
    /// Decoded readings for `user`, in ascending slot order
    pub readings: Vec<R>,
    /// Number of decoded readings that belonged to the other user
    pub other_user_readings: usize,
    /// Readings that failed to decode
    pub skipped: Vec<SkippedReading>,
    /// When collection finished
    pub collected_at: DateTime<Utc>,
}

/// Options for [`Session::collect`]
#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    /// Only keep readings for this user
    pub user: UserSlot,
    /// What to do with a reading that fails to decode
    pub decode_failure_policy: DecodeFailurePolicy,
    /// Stamped on every kept reading
    pub device_id: Option<String>,
    /// Stamped on every kept reading
    pub location: Option<GeoLocation>,
}

impl From<&DeviceConfig> for CollectOptions {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            user: config.user,
            decode_failure_policy: config.decode_failure_policy,
            device_id: config.device_id.clone(),
            location: config.location.clone(),
        }
    }
}

/// Sends a command frame and waits for the 8-byte answer
pub trait FrameExchange {
    /// Builder for command frames on this link
    fn builder(&self) -> &CommandBuilder;

    /// One blocking round trip
    fn exchange(&mut self, frame: &[u8]) -> Result<RawFrame, ProtocolError>;
}

/// Transport plus the fixed transfer parameters
struct Link<T: Transport> {
    transport: T,
    builder: CommandBuilder,
    setup: ControlSetup,
    in_endpoint: u8,
    timeout: Duration,
    released: bool,
}

impl<T: Transport> Link<T> {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.transport.release() {
            warn!("Failed to release device interface: {}", e);
        }
    }
}

impl<T: Transport> FrameExchange for Link<T> {
    fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    fn exchange(&mut self, frame: &[u8]) -> Result<RawFrame, ProtocolError> {
        if self.released {
            return Err(ProtocolError::ConnectionFailed(
                "device interface already released".to_string(),
            ));
        }

        debug!("TX {:02X?}", frame);
        let sent = self.transport.send_control(self.setup, frame, self.timeout)?;
        if sent != frame.len() {
            return Err(ProtocolError::ShortWrite {
                expected: frame.len(),
                actual: sent,
            });
        }

        let mut buf = [0u8; FRAME_LEN];
        let received = self
            .transport
            .read_bulk(self.in_endpoint, &mut buf, self.timeout)?;
        if received < FRAME_LEN {
            return Err(ProtocolError::ShortRead {
                expected: FRAME_LEN,
                actual: received,
            });
        }
        debug!("RX {:02X?}", buf);

        Ok(RawFrame::new(buf))
    }
}

/// One collection session against a meter
pub struct Session<D: DeviceDriver, T: Transport> {
    id: Uuid,
    driver: D,
    link: Link<T>,
    state: SessionState,
    /// The meter has been sent an initialize and not yet shut down
    handshake_open: bool,
}

impl<D: DeviceDriver, T: Transport> Session<D, T> {
    /// Create a session over an already claimed transport
    pub fn new(driver: D, transport: T, settings: &UsbSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            driver,
            link: Link {
                transport,
                builder: CommandBuilder::default(),
                setup: ControlSetup::SET_REPORT,
                in_endpoint: settings.in_endpoint,
                timeout: settings.timeout(),
                released: false,
            },
            state: SessionState::Disconnected,
            handshake_open: false,
        }
    }

    /// Unique ID, also stamped on the collection report
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Record a fatal error
    fn check<V>(&mut self, result: Result<V, ProtocolError>) -> Result<V, ProtocolError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(session = %self.id, "Session failed in state {}: {}", self.state, e);
                self.state = SessionState::Failed;
            }
        }
        result
    }

    fn invalid_state(&self, operation: &'static str) -> ProtocolError {
        ProtocolError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// Wake the meter
    pub fn initialize(&mut self) -> Result<(), ProtocolError> {
        if self.state != SessionState::Disconnected {
            return Err(self.invalid_state("initialize"));
        }

        self.handshake_open = true;
        let result = self.driver.initialize(&mut self.link);
        self.check(result)?;

        self.state = SessionState::Initialized;
        info!(session = %self.id, "Initialized {}", self.driver.descriptor());
        Ok(())
    }

    /// Ask the meter how many reading slots it holds
    pub fn query_count(&mut self) -> Result<u8, ProtocolError> {
        if self.state != SessionState::Initialized {
            return Err(self.invalid_state("query count"));
        }

        let result = self.driver.query_count(&mut self.link);
        let count = self.check(result)?;

        if count >= 128 {
            warn!(
                session = %self.id,
                "Meter reports {} slots; treating the count byte as unsigned", count
            );
        }
        info!(session = %self.id, "Meter holds {} reading slot(s)", count.saturating_sub(1));

        self.state = SessionState::CountKnown { count };
        Ok(count)
    }

    /// Fetch and decode the reading stored in `index`.
    ///
    /// Indices must be fetched in increasing order within `1..count`. A decode
    /// failure is returned as the inner error and does not end the session.
    pub fn fetch_reading(
        &mut self,
        index: u8,
    ) -> Result<Result<D::Reading, FrameDecodeError>, ProtocolError> {
        let (next, count) = match self.state {
            SessionState::CountKnown { count } => (1, count),
            SessionState::Reading { index: last, count } => (last.saturating_add(1), count),
            _ => return Err(self.invalid_state("fetch reading")),
        };
        if index < next || index >= count {
            return Err(ProtocolError::InvalidReadingIndex { index, count });
        }

        let result = self.driver.fetch_reading(&mut self.link, index);
        let decoded = self.check(result)?;

        self.state = SessionState::Reading { index, count };
        Ok(decoded)
    }

    /// Run the shutdown handshake
    pub fn terminate(&mut self) -> Result<(), ProtocolError> {
        if !self.handshake_open {
            return Err(self.invalid_state("terminate"));
        }

        self.handshake_open = false;
        let result = self.driver.terminate(&mut self.link);
        self.check(result)?;

        if self.state != SessionState::Failed {
            self.state = SessionState::Terminated;
        }
        info!(session = %self.id, "Session terminated");
        Ok(())
    }

    /// Release the transport without talking to the meter
    pub fn release(&mut self) {
        self.link.release();
    }

    /// Run a whole collection.
    ///
    /// The shutdown handshake runs whenever the meter was initialized, even if
    /// collection failed or was cancelled, and the transport is released
    /// before returning.
    pub fn collect(
        &mut self,
        options: &CollectOptions,
        cancel: &CancelToken,
    ) -> Result<CollectionReport<D::Reading>, ProtocolError> {
        let outcome = self.collect_readings(options, cancel);

        let shutdown = if self.handshake_open {
            self.terminate()
        } else {
            Ok(())
        };
        self.release();

        match (outcome, shutdown) {
            (Err(e), shutdown) => {
                if let Err(t) = shutdown {
                    warn!(session = %self.id, "Shutdown handshake failed after error: {}", t);
                }
                Err(e)
            }
            (Ok(_), Err(t)) => Err(t),
            (Ok(report), Ok(())) => Ok(report),
        }
    }

    fn collect_readings(
        &mut self,
        options: &CollectOptions,
        cancel: &CancelToken,
    ) -> Result<CollectionReport<D::Reading>, ProtocolError> {
        self.initialize()?;
        if cancel.is_cancelled() {
            return Err(ProtocolError::Cancelled);
        }

        let count = self.query_count()?;

        let mut decoded = Vec::new();
        let mut skipped = Vec::new();
        for index in 1..count {
            if cancel.is_cancelled() {
                info!(session = %self.id, "Collection cancelled before slot {}", index);
                return Err(ProtocolError::Cancelled);
            }

            match self.fetch_reading(index)? {
                Ok(reading) => decoded.push(reading),
                Err(error) => match options.decode_failure_policy {
                    DecodeFailurePolicy::Skip => {
                        warn!(session = %self.id, "Skipping reading {}: {}", index, error);
                        skipped.push(SkippedReading { index, error });
                    }
                    DecodeFailurePolicy::Abort => {
                        return Err(ProtocolError::Decode {
                            index,
                            source: error,
                        });
                    }
                },
            }
        }

        let total = decoded.len();
        let mut readings = filter_by_user(decoded, options.user);
        for reading in &mut readings {
            // Readings are fresh from the decoder, so provenance is unset.
            if let Err(e) =
                reading.attach_provenance(options.device_id.as_deref(), options.location.as_ref())
            {
                warn!(session = %self.id, "Could not stamp provenance: {}", e);
            }
        }

        info!(
            session = %self.id,
            "Collected {} reading(s) for user {} ({} for other user, {} skipped)",
            readings.len(),
            options.user,
            total - readings.len(),
            skipped.len()
        );

        Ok(CollectionReport {
            session_id: self.id,
            device: self.driver.descriptor(),
            user: options.user,
            slot_count: count,
            other_user_readings: total - readings.len(),
            readings,
            skipped,
            collected_at: Utc::now(),
        })
    }
}

impl<D: DeviceDriver, T: Transport> Drop for Session<D, T> {
    fn drop(&mut self) {
        if self.handshake_open {
            if let Err(e) = self.terminate() {
                warn!(session = %self.id, "Shutdown handshake failed on drop: {}", e);
            }
        }
        self.link.release();
    }
}
