//! Demo Mode - Simulated BM55 meter for testing
//!
//! Answers the BM55 command set from an in-memory list of stored readings so
//! sessions can run without hardware. Every frame sent to the simulator is
//! logged, and faults (timeouts, short reads, corrupt slots) can be injected
//! at chosen points of the exchange.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::config::UsbSettings;
use crate::protocol::frame::{join_flag, PRESSURE_OFFSET, YEAR_BASE};
use crate::protocol::{
    Command, ConnectionProvider, ControlSetup, ProtocolError, Transport, BM55_PRODUCT_ID,
    BM55_VENDOR_ID, FRAME_LEN,
};
use crate::reading::{BloodPressureReading, UserSlot};

/// Most readings the count byte can describe (slot 0 is reserved)
pub const MAX_STORED_READINGS: usize = 254;

/// Encode a reading the way the meter stores it.
///
/// Returns `None` if a field cannot be represented in the frame.
pub fn encode_reading(reading: &BloodPressureReading) -> Option<[u8; FRAME_LEN]> {
    let at = reading.measured_at();
    let year = u16::try_from(at.year()).ok()?.checked_sub(YEAR_BASE)?;
    if year > 0x7F {
        return None;
    }

    let systolic = u8::try_from(reading.systolic_pressure().checked_sub(PRESSURE_OFFSET)?).ok()?;
    let diastolic = u8::try_from(reading.diastolic_pressure().checked_sub(PRESSURE_OFFSET)?).ok()?;

    Some([
        systolic,
        diastolic,
        reading.pulse_rate(),
        join_flag(at.month() as u8, reading.resting_indicator()),
        join_flag(at.day() as u8, reading.user_slot() == UserSlot::B),
        at.hour() as u8,
        at.minute() as u8,
        join_flag(year as u8, reading.arrhythmia_indicator()),
    ])
}

/// Everything the simulator has seen
#[derive(Debug, Clone, Default)]
pub struct MeterLog {
    /// Command frames in the order they were sent
    pub sent: Vec<Vec<u8>>,
    /// Setup packet of each control transfer
    pub setups: Vec<ControlSetup>,
    /// Number of bulk reads attempted
    pub reads: usize,
    /// Endpoints used for bulk reads
    pub endpoints: Vec<u8>,
    /// Interface has been released
    pub released: bool,
}

impl MeterLog {
    /// First byte of every frame sent
    pub fn opcodes(&self) -> Vec<u8> {
        self.sent.iter().filter_map(|f| f.first().copied()).collect()
    }
}

/// Simulated BM55 meter
#[derive(Debug, Clone)]
pub struct SimulatedBm55 {
    /// Stored frames; device slot `i` is `slots[i - 1]`
    slots: Vec<[u8; FRAME_LEN]>,
    /// Answer to the last command, consumed by the next read
    pending: Option<[u8; FRAME_LEN]>,
    log: Arc<Mutex<MeterLog>>,
    timeout_at: Option<usize>,
    short_read_at: Option<usize>,
    /// Artificial delay per transfer
    latency: Duration,
}

impl Default for SimulatedBm55 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBm55 {
    /// A meter with no stored readings
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            pending: None,
            log: Arc::new(Mutex::new(MeterLog::default())),
            timeout_at: None,
            short_read_at: None,
            latency: Duration::ZERO,
        }
    }

    /// A meter holding `readings` in slots 1..
    pub fn with_readings(readings: Vec<BloodPressureReading>) -> Self {
        let mut meter = Self::new();
        for reading in &readings {
            match encode_reading(reading) {
                Some(frame) => meter.push_frame(frame),
                None => warn!("Reading cannot be stored on a BM55: {}", reading),
            }
        }
        meter
    }

    /// A meter holding `count` random but plausible readings
    pub fn with_random_readings(count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut meter = Self::new();
        for _ in 0..count.min(MAX_STORED_READINGS) {
            let reading = random_reading(&mut rng);
            if let Some(frame) = encode_reading(&reading) {
                meter.push_frame(frame);
            }
        }
        meter
    }

    /// Store a raw frame in the next free slot
    pub fn push_frame(&mut self, frame: [u8; FRAME_LEN]) {
        if self.slots.len() >= MAX_STORED_READINGS {
            warn!("Simulated meter is full, dropping frame {:02X?}", frame);
            return;
        }
        self.slots.push(frame);
    }

    /// Number of stored readings
    pub fn stored(&self) -> usize {
        self.slots.len()
    }

    /// Make the reading in device slot `index` undecodable (month 0)
    pub fn corrupt_slot(&mut self, index: u8) {
        if let Some(frame) = (index as usize)
            .checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
        {
            frame[3] &= 0x80;
        }
    }

    /// Time out the `n`-th bulk read (1-based)
    pub fn fail_read_at(&mut self, n: usize) {
        self.timeout_at = Some(n);
    }

    /// Return only half a frame on the `n`-th bulk read (1-based)
    pub fn short_read_at(&mut self, n: usize) {
        self.short_read_at = Some(n);
    }

    /// Delay every transfer by `latency`
    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = latency;
    }

    /// Shared handle on the exchange log (clones of this meter share it)
    pub fn log(&self) -> Arc<Mutex<MeterLog>> {
        Arc::clone(&self.log)
    }

    /// A copy of this meter as freshly plugged in: same stored readings and
    /// fault settings, empty log, nothing pending.
    fn reconnected(&self) -> Self {
        Self {
            pending: None,
            log: Arc::new(Mutex::new(MeterLog::default())),
            ..self.clone()
        }
    }

    fn is_released(&self) -> bool {
        self.log.lock().map(|log| log.released).unwrap_or(true)
    }

    fn answer(&self, command: Command) -> [u8; FRAME_LEN] {
        match command {
            Command::QueryCount => {
                let mut frame = [0u8; FRAME_LEN];
                frame[0] = (self.slots.len() + 1) as u8;
                frame
            }
            Command::FetchReading(index) => (index as usize)
                .checked_sub(1)
                .and_then(|i| self.slots.get(i))
                .copied()
                .unwrap_or([0u8; FRAME_LEN]),
            other => {
                let mut frame = [0u8; FRAME_LEN];
                frame[0] = other.opcode();
                frame
            }
        }
    }
}

impl Transport for SimulatedBm55 {
    fn send_control(
        &mut self,
        setup: ControlSetup,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, ProtocolError> {
        if self.is_released() {
            return Err(ProtocolError::Transfer("interface released".to_string()));
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        if let Ok(mut log) = self.log.lock() {
            log.sent.push(data.to_vec());
            log.setups.push(setup);
        }

        self.pending = Command::from_frame(data).map(|command| self.answer(command));
        Ok(data.len())
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, ProtocolError> {
        if self.is_released() {
            return Err(ProtocolError::Transfer("interface released".to_string()));
        }

        let n = match self.log.lock() {
            Ok(mut log) => {
                log.reads += 1;
                log.endpoints.push(endpoint);
                log.reads
            }
            Err(_) => return Err(ProtocolError::Transfer("meter log poisoned".to_string())),
        };

        let frame = self.pending.take();
        if self.timeout_at == Some(n) {
            return Err(ProtocolError::Timeout);
        }
        // An unknown command gets no answer
        let frame = frame.ok_or(ProtocolError::Timeout)?;

        let len = if self.short_read_at == Some(n) {
            FRAME_LEN / 2
        } else {
            FRAME_LEN
        };
        let len = len.min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }

    fn release(&mut self) -> Result<(), ProtocolError> {
        if let Ok(mut log) = self.log.lock() {
            log.released = true;
        }
        Ok(())
    }
}

/// Connection provider that hands out a simulated meter.
///
/// Every connection gets its own copy of the stored readings and a fresh
/// exchange log, so one session never sees another's state.
#[derive(Debug, Clone, Default)]
pub struct DemoProvider {
    meter: SimulatedBm55,
    connections: Arc<Mutex<Vec<Arc<Mutex<MeterLog>>>>>,
}

impl DemoProvider {
    /// Serve copies of `meter`
    pub fn new(meter: SimulatedBm55) -> Self {
        Self {
            meter,
            connections: Arc::default(),
        }
    }

    /// The meter every connection is copied from
    pub fn meter(&self) -> &SimulatedBm55 {
        &self.meter
    }

    /// Number of successful connections so far
    pub fn connections(&self) -> usize {
        self.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Exchange log of the `n`-th connection (0-based)
    pub fn connection_log(&self, n: usize) -> Option<Arc<Mutex<MeterLog>>> {
        self.connections.lock().ok()?.get(n).cloned()
    }

    /// Exchange log of the most recent connection
    pub fn last_log(&self) -> Option<Arc<Mutex<MeterLog>>> {
        self.connections.lock().ok()?.last().cloned()
    }
}

impl ConnectionProvider for DemoProvider {
    type Transport = SimulatedBm55;

    fn connect(&self, settings: &UsbSettings) -> Result<SimulatedBm55, ProtocolError> {
        if settings.vendor_id != BM55_VENDOR_ID || settings.product_id != BM55_PRODUCT_ID {
            return Err(ProtocolError::DeviceNotFound {
                vendor_id: settings.vendor_id,
                product_id: settings.product_id,
            });
        }

        let meter = self.meter.reconnected();
        self.connections
            .lock()
            .map_err(|_| ProtocolError::ConnectionFailed("demo provider poisoned".to_string()))?
            .push(meter.log());
        Ok(meter)
    }
}

fn random_reading(rng: &mut StdRng) -> BloodPressureReading {
    let systolic = rng.gen_range(100..165);
    let diastolic = rng.gen_range(60..systolic - 25);
    let pulse = rng.gen_range(52..100);
    let user = if rng.gen_bool(0.5) {
        UserSlot::A
    } else {
        UserSlot::B
    };

    let date = NaiveDate::from_ymd_opt(2024, rng.gen_range(1..=12), rng.gen_range(1..=28))
        .and_then(|d| d.and_hms_opt(rng.gen_range(0..24), rng.gen_range(0..60), 0))
        .unwrap_or_default();

    BloodPressureReading::new(
        systolic,
        diastolic,
        pulse,
        user,
        rng.gen_bool(0.3),
        rng.gen_bool(0.05),
        date,
    )
}
