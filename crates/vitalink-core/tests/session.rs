use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;
use vitalink_core::demo::MeterLog;
use vitalink_core::prelude::*;
use vitalink_core::protocol::ControlSetup;

/// Route library events to the test harness (set RUST_LOG to see them)
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn reading(systolic: u16, user: UserSlot, day: u32) -> BloodPressureReading {
    let at = NaiveDate::from_ymd_opt(2023, 6, day)
        .unwrap()
        .and_hms_opt(10, 30, 0)
        .unwrap();
    BloodPressureReading::new(systolic, 80, 60, user, false, false, at)
}

fn padded(head: &[u8]) -> Vec<u8> {
    let mut frame = head.to_vec();
    frame.resize(8, 0xF4);
    frame
}

fn three_readings() -> SimulatedBm55 {
    SimulatedBm55::with_readings(vec![
        reading(120, UserSlot::A, 1),
        reading(130, UserSlot::B, 2),
        reading(140, UserSlot::A, 3),
    ])
}

type Collected = Result<CollectionReport<BloodPressureReading>, ProtocolError>;

/// Run one collection and return its outcome with what the meter saw
fn collect_with(
    meter: SimulatedBm55,
    config: &DeviceConfig,
    cancel: &CancelToken,
) -> (Collected, MeterLog) {
    init_logging();
    let provider = DemoProvider::new(meter);
    let result = Bm55Driver::new().get_measurements(&provider, config, cancel);
    let log = provider
        .last_log()
        .map(|log| log.lock().unwrap().clone())
        .unwrap_or_default();
    (result, log)
}

fn collect(meter: SimulatedBm55, config: &DeviceConfig) -> (Collected, MeterLog) {
    collect_with(meter, config, &CancelToken::new())
}

#[test]
fn test_full_exchange_on_the_wire() {
    let (report, log) = collect(three_readings(), &DeviceConfig::default());
    let report = report.unwrap();

    assert_eq!(
        log.sent,
        vec![
            padded(&[0xAA]),
            padded(&[0xA2]),
            padded(&[0xA3, 1]),
            padded(&[0xA3, 2]),
            padded(&[0xA3, 3]),
            padded(&[0xF7]),
            padded(&[0xF6]),
        ]
    );
    assert!(log.setups.iter().all(|s| *s == ControlSetup::SET_REPORT));
    assert!(log.endpoints.iter().all(|&ep| ep == 0x81));
    assert_eq!(log.reads, 7);
    assert!(log.released);

    assert_eq!(report.slot_count, 4);
    assert_eq!(report.other_user_readings, 1);
    assert!(report.skipped.is_empty());
}

#[test]
fn test_readings_filtered_in_slot_order() {
    let report = collect(three_readings(), &DeviceConfig::default()).0.unwrap();
    let systolic: Vec<u16> = report.readings.iter().map(|r| r.systolic_pressure()).collect();
    assert_eq!(systolic, vec![120, 140]);
    assert_eq!(report.user, UserSlot::A);

    let config = DeviceConfig {
        user: UserSlot::B,
        ..DeviceConfig::default()
    };
    let report = collect(three_readings(), &config).0.unwrap();
    assert_eq!(report.readings.len(), 1);
    assert_eq!(report.readings[0].systolic_pressure(), 130);
    assert_eq!(report.readings[0].user_slot(), UserSlot::B);
    assert_eq!(report.other_user_readings, 2);
}

#[test]
fn test_empty_meter_fetches_nothing() {
    let (report, log) = collect(SimulatedBm55::new(), &DeviceConfig::default());
    let report = report.unwrap();
    assert!(report.readings.is_empty());
    assert_eq!(report.slot_count, 1);
    assert_eq!(log.opcodes(), vec![0xAA, 0xA2, 0xF7, 0xF6]);
}

#[test]
fn test_provider_serves_repeated_sessions() {
    init_logging();
    let provider = DemoProvider::new(SimulatedBm55::with_random_readings(3, 1));
    let config = DeviceConfig::default();

    let first = Bm55Driver::new()
        .get_measurements(&provider, &config, &CancelToken::new())
        .unwrap();
    let second = Bm55Driver::new()
        .get_measurements(&provider, &config, &CancelToken::new())
        .unwrap();

    assert_ne!(first.session_id, second.session_id);
    assert_eq!(first.readings, second.readings);
    assert_eq!(provider.connections(), 2);
    for n in 0..2 {
        let log = provider.connection_log(n).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.opcodes(), vec![0xAA, 0xA2, 0xA3, 0xA3, 0xA3, 0xF7, 0xF6]);
        assert!(log.released);
    }
}

#[test]
fn test_timeout_still_runs_shutdown() {
    let mut meter = three_readings();
    // reads: init, count, slot 1, slot 2
    meter.fail_read_at(4);

    let (result, log) = collect(meter, &DeviceConfig::default());
    assert!(matches!(result, Err(ProtocolError::Timeout)));
    assert_eq!(log.opcodes(), vec![0xAA, 0xA2, 0xA3, 0xA3, 0xF7, 0xF6]);
    assert!(log.released);
}

#[test]
fn test_short_read_fails_collection() {
    let mut meter = three_readings();
    meter.short_read_at(2);

    let (result, log) = collect(meter, &DeviceConfig::default());
    assert!(matches!(
        result,
        Err(ProtocolError::ShortRead {
            expected: 8,
            actual: 4
        })
    ));
    assert_eq!(log.opcodes(), vec![0xAA, 0xA2, 0xF7, 0xF6]);
}

#[test]
fn test_cancel_before_count() {
    let cancel = CancelToken::new();
    cancel.cancel();

    let (result, log) = collect_with(three_readings(), &DeviceConfig::default(), &cancel);
    assert!(matches!(result, Err(ProtocolError::Cancelled)));
    assert_eq!(log.opcodes(), vec![0xAA, 0xF7, 0xF6]);
    assert!(log.released);
}

#[test]
fn test_undecodable_reading_is_skipped() {
    let mut meter = three_readings();
    meter.corrupt_slot(2);

    let report = collect(meter, &DeviceConfig::default()).0.unwrap();
    assert_eq!(report.readings.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].index, 2);
    assert!(matches!(
        report.skipped[0].error,
        FrameDecodeError::InvalidTimestamp { month: 0, .. }
    ));
    // The bad slot does not count as the other user's
    assert_eq!(report.other_user_readings, 0);
}

#[test]
fn test_abort_policy_stops_at_bad_reading() {
    let mut meter = three_readings();
    meter.corrupt_slot(2);
    let config = DeviceConfig {
        decode_failure_policy: DecodeFailurePolicy::Abort,
        ..DeviceConfig::default()
    };

    let (result, log) = collect(meter, &config);
    assert!(matches!(result, Err(ProtocolError::Decode { index: 2, .. })));
    assert_eq!(log.opcodes(), vec![0xAA, 0xA2, 0xA3, 0xA3, 0xF7, 0xF6]);
}

#[test]
fn test_provenance_stamped_on_kept_readings() {
    let config = DeviceConfig {
        device_id: Some("ward-3-tablet".to_string()),
        location: Some(GeoLocation::new(53.8, -1.55)),
        ..DeviceConfig::default()
    };

    let report = collect(three_readings(), &config).0.unwrap();
    assert_eq!(report.readings.len(), 2);
    for reading in &report.readings {
        assert_eq!(reading.device_id(), Some("ward-3-tablet"));
        assert_eq!(reading.location(), Some(&GeoLocation::new(53.8, -1.55)));
    }
}

#[test]
fn test_unknown_device_sends_nothing() {
    let mut config = DeviceConfig::default();
    config.usb.product_id = 0x0001;

    let provider = DemoProvider::new(three_readings());
    let result = Bm55Driver::new().get_measurements(&provider, &config, &CancelToken::new());
    assert!(matches!(
        result,
        Err(ProtocolError::DeviceNotFound {
            product_id: 0x0001,
            ..
        })
    ));
    assert_eq!(provider.connections(), 0);
}

#[test]
fn test_manual_session_drop_releases() {
    init_logging();
    let meter = three_readings();
    let log = meter.log();
    {
        let mut session = Session::new(Bm55Driver::new(), meter, &UsbSettings::default());
        session.initialize().unwrap();
        assert_eq!(session.query_count().unwrap(), 4);
        let first = session.fetch_reading(1).unwrap().unwrap();
        assert_eq!(first.systolic_pressure(), 120);
        assert!(matches!(
            session.fetch_reading(1),
            Err(ProtocolError::InvalidReadingIndex { index: 1, count: 4 })
        ));
        assert_eq!(session.state(), SessionState::Reading { index: 1, count: 4 });
    }

    let log = log.lock().unwrap();
    assert_eq!(log.opcodes(), vec![0xAA, 0xA2, 0xA3, 0xF7, 0xF6]);
    assert!(log.released);
}

#[test]
fn test_report_serializes_to_json() {
    let report = collect(three_readings(), &DeviceConfig::default()).0.unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["user"], "A");
    assert_eq!(value["slot_count"], 4);
    assert_eq!(value["device"]["model"], "BM-55");
    assert_eq!(value["readings"].as_array().unwrap().len(), 2);
}
