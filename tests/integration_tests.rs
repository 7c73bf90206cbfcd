use std::thread;
use std::time::{Duration, Instant};

use ptp_sync::{
    clock::{Applied, CounterWidth},
    config::{ConfigError, SyncConfig},
    device::{Role, SyncDevice, SyncError},
    protocol::{MessageKind, SyncMessage},
    sync::{
        calculate_offset, endpoint::RECEIVE_BURST, CycleFailure, FilterPolicy, MAX_SYNC_CYCLES,
    },
};

use mock::{
    channel_pair, count_kind, payload, raw_payload, sim_time, BusyLink, MockRtc, Packet, SimClock,
    SimDelay, SimLink, SimMaster, SimPeripheral, SimTime, StdClock, StdDelay,
};

type Peripheral =
    SyncDevice<SimLink<SimMaster>, fn(&Packet) -> &[u8], SimClock, MockRtc, SimDelay>;
type Master =
    SyncDevice<SimLink<SimPeripheral>, fn(&Packet) -> &[u8], SimClock, MockRtc, SimDelay>;

// Test helper to create a peripheral talking to a simulated master
fn create_peripheral(
    time: &SimTime,
    config: SyncConfig,
    link: SimLink<SimMaster>,
    skew_us: i64,
) -> Peripheral {
    SyncDevice::new(
        Role::Peripheral,
        config,
        link,
        payload as fn(&Packet) -> &[u8],
        SimClock::new(time, skew_us),
        MockRtc::new(),
        SimDelay::new(time),
    )
    .unwrap()
}

fn create_master(time: &SimTime, config: SyncConfig, link: SimLink<SimPeripheral>) -> Master {
    SyncDevice::new(
        Role::Master,
        config,
        link,
        payload as fn(&Packet) -> &[u8],
        SimClock::new(time, 0),
        MockRtc::new(),
        SimDelay::new(time),
    )
    .unwrap()
}

fn master_link(time: &SimTime) -> SimLink<SimMaster> {
    SimLink::new(time, 10_000, SimMaster::new(10_000, 1_000))
}

#[test]
fn test_happy_path() {
    let time = sim_time();
    let mut device = create_peripheral(&time, SyncConfig::new(1_000, 5), master_link(&time), 0);

    let report = device.synchronize(true).unwrap();

    assert_eq!(report.correction.offset_us, 0);
    assert_eq!(report.correction.valid_samples, 5);
    assert_eq!(report.correction.total_cycles, 5);
    assert_eq!(report.applied, Applied::Unchanged);
    for quad in report.record.quads() {
        let sample = calculate_offset(
            quad.t1.unwrap(),
            quad.t2.unwrap(),
            quad.t3.unwrap(),
            quad.t4.unwrap(),
        )
        .unwrap();
        assert_eq!(sample.offset, 0);
        assert_eq!(sample.round_trip(), 20_000);
    }

    let sent = device.link().sent_messages();
    assert_eq!(count_kind(&sent, MessageKind::SyncRequest), 1);
    assert_eq!(count_kind(&sent, MessageKind::DelayRequest), 5);
    assert_eq!(device.rtc().writes, 0);
}

#[test]
fn test_skewed_clocks() {
    let time = sim_time();
    let mut device = create_peripheral(
        &time,
        SyncConfig::new(1_000, 5),
        master_link(&time),
        50_000,
    );

    let report = device.synchronize(true).unwrap();

    assert_eq!(report.correction.offset_us, 50_000);
    assert_eq!(report.applied, Applied::Adjusted { delta_us: -50_000 });
    assert_eq!(device.rtc().shifted_us(), -50_000);
    assert_eq!(device.rtc().writes, 1);
}

#[test]
fn test_total_loss() {
    let time = sim_time();
    let link = master_link(&time).drop_inbound(|m| matches!(m, SyncMessage::Sync { .. }));
    let mut device = create_peripheral(&time, SyncConfig::new(1_000, 3), link, 20_000);

    let result = device.synchronize(true);

    assert!(matches!(result, Err(SyncError::NoValidSamples { round: 1 })));
    assert_eq!(device.rtc().writes, 0);
    assert_eq!(device.rtc().shifted_us(), 0);
}

#[test]
fn test_round_resilience() {
    let time = sim_time();
    // Only the last Sync of the round gets through
    let link = master_link(&time)
        .drop_inbound(|m| matches!(m, SyncMessage::Sync { sequence, .. } if *sequence < 4));
    let mut device = create_peripheral(&time, SyncConfig::new(1_000, 5), link, -7_000);

    let report = device.synchronize(true).unwrap();

    assert_eq!(report.record.len(), 5);
    assert_eq!(report.correction.valid_samples, 1);
    assert_eq!(report.correction.offset_us, -7_000);
    assert_eq!(report.applied, Applied::Adjusted { delta_us: 7_000 });
    let timeouts = report
        .record
        .cycles
        .iter()
        .filter(|c| c.failure == Some(CycleFailure::Timeout(MessageKind::Sync)))
        .count();
    assert_eq!(timeouts, 4);
}

#[test]
fn test_zero_correction_idempotent() {
    let time = sim_time();
    let mut device = create_peripheral(&time, SyncConfig::new(1_000, 3), master_link(&time), 0);

    let report = device.synchronize(true).unwrap();
    assert_eq!(report.applied, Applied::Unchanged);
    assert_eq!(
        device.apply_correction(&report.correction).unwrap(),
        Applied::AlreadyApplied
    );
    assert_eq!(device.rtc().writes, 0);
    assert_eq!(device.rtc().shifted_us(), 0);
}

#[test]
fn test_correction_applied_once_per_round() {
    let time = sim_time();
    let mut device = create_peripheral(
        &time,
        SyncConfig::new(1_000, 2),
        master_link(&time),
        3_000,
    );

    let report = device.synchronize(true).unwrap();
    assert_eq!(
        device.apply_correction(&report.correction).unwrap(),
        Applied::AlreadyApplied
    );
    assert_eq!(device.rtc().shifted_us(), -3_000);
}

#[test]
fn test_filter_policy_from_config() {
    let time = sim_time();
    let config = SyncConfig::new(1_000, 3).with_filter(FilterPolicy::Median);
    let mut device = create_peripheral(&time, config, master_link(&time), 12_000);

    let report = device.synchronize(true).unwrap();
    assert_eq!(report.correction.offset_us, 12_000);
}

#[test]
fn test_delay_ceiling_rejects_slow_cycles() {
    let time = sim_time();
    // Every cycle has a 10 ms one-way delay
    let config = SyncConfig::new(1_000, 2).with_max_delay_us(5_000);
    let mut device = create_peripheral(&time, config, master_link(&time), 0);

    let result = device.synchronize(true);
    assert!(matches!(result, Err(SyncError::NoValidSamples { .. })));
}

#[test]
fn test_passthrough_during_round() {
    let time = sim_time();
    let mut link = master_link(&time);
    link.inject(5_000, b"{\"lux\": 12}");
    link.inject(25_000, b"hello");
    let mut device = create_peripheral(&time, SyncConfig::new(1_000, 2), link, 0);

    let report = device.synchronize(true).unwrap();
    assert_eq!(report.correction.valid_samples, 2);

    assert_eq!(
        device.take_passthrough().map(|p| p.data),
        Some(b"{\"lux\": 12}".to_vec())
    );
    assert_eq!(device.take_passthrough().map(|p| p.data), Some(b"hello".to_vec()));
    assert!(device.take_passthrough().is_none());
}

#[test]
fn test_master_serves_sync_request() {
    let time = sim_time();
    let mut link = SimLink::new(&time, 10_000, SimPeripheral::new(10_000, 50_000));
    link.inject(0, &SyncMessage::SyncRequest { num_sync_cycles: 3 }.to_bytes());
    let mut device = create_master(&time, SyncConfig::default(), link);

    let record = device.poll_master().unwrap().unwrap();

    assert_eq!(record.len(), 3);
    assert_eq!(record.completed(), 3);
    let correction = device.compute_correction(&record).unwrap();
    assert_eq!(correction.offset_us, 50_000);
    assert_eq!(device.link().peer().responses.len(), 3);

    // Nothing pending afterwards
    assert!(device.poll_master().unwrap().is_none());
}

#[test]
fn test_master_poll_returns_on_busy_link() {
    let time = sim_time();
    let chatter = SyncMessage::DelayRequest {
        sequence: 4,
        t2: 0,
        t3: 0,
    };
    let mut master = SyncDevice::new(
        Role::Master,
        SyncConfig::default(),
        BusyLink::new(&time, 100, &chatter.to_bytes()),
        payload as fn(&Packet) -> &[u8],
        SimClock::new(&time, 0),
        MockRtc::new(),
        SimDelay::new(&time),
    )
    .unwrap();

    assert_eq!(master.poll_master().unwrap(), None);
    assert_eq!(master.link().receives, RECEIVE_BURST);
}

#[test]
fn test_master_clamps_cycle_count() {
    let time = sim_time();
    let mut link = SimLink::new(&time, 2_000, SimPeripheral::new(2_000, 0));
    link.inject(0, &SyncMessage::SyncRequest { num_sync_cycles: 100 }.to_bytes());
    let config = SyncConfig::default().with_cycle_gap_ms(1);
    let mut device = create_master(&time, config, link);

    let record = device.poll_master().unwrap().unwrap();
    assert_eq!(record.len(), MAX_SYNC_CYCLES);
}

#[test]
fn test_master_link_failure_abandons_cycle_only() {
    let time = sim_time();
    let link = SimLink::new(&time, 10_000, SimPeripheral::new(10_000, 0));
    let mut device = create_master(&time, SyncConfig::default(), link);
    device.link_mut().fail_next_sends(1);

    let record = device.run_master_round(2).unwrap();
    assert_eq!(record.cycles[0].failure, Some(CycleFailure::Link));
    assert!(record.cycles[1].is_complete());
}

#[test]
fn test_master_on_wrapping_counter() {
    let time = sim_time();
    let width = CounterWidth::new(30).unwrap();
    // Counter wraps while the first Sync is in flight
    time.set(width.max_value() + 1 - 5_000);
    let peer = SimPeripheral::new(10_000, 0).with_width(width);
    let link = SimLink::new(&time, 10_000, peer);
    let mut device = SyncDevice::new(
        Role::Master,
        SyncConfig::default(),
        link,
        payload as fn(&Packet) -> &[u8],
        SimClock::new(&time, 0).with_width(width),
        MockRtc::new(),
        SimDelay::new(&time),
    )
    .unwrap();

    let record = device.run_master_round(3).unwrap();
    assert_eq!(record.completed(), 3);
    let correction = device.compute_correction(&record).unwrap();
    assert_eq!(correction.offset_us, 0);
    assert_eq!(correction.valid_samples, 3);
}

#[test]
fn test_role_checks() {
    let time = sim_time();
    let mut peripheral =
        create_peripheral(&time, SyncConfig::default(), master_link(&time), 0);
    assert!(matches!(
        peripheral.poll_master(),
        Err(SyncError::WrongRole {
            expected: Role::Master
        })
    ));

    let link = SimLink::new(&time, 10_000, SimPeripheral::new(10_000, 0));
    let mut master = create_master(&time, SyncConfig::default(), link);
    assert!(matches!(
        master.synchronize(true),
        Err(SyncError::WrongRole {
            expected: Role::Peripheral
        })
    ));
    assert_eq!(master.role(), Role::Master);
}

#[test]
fn test_invalid_config_rejected() {
    let time = sim_time();
    let result = SyncDevice::new(
        Role::Peripheral,
        SyncConfig::new(1_000, 0),
        master_link(&time),
        payload as fn(&Packet) -> &[u8],
        SimClock::new(&time, 0),
        MockRtc::new(),
        SimDelay::new(&time),
    );
    assert!(matches!(
        result,
        Err(SyncError::Config(ConfigError::InvalidCycleCount(0)))
    ));
}

#[test]
fn test_invalid_round_length() {
    let time = sim_time();
    let mut device = create_peripheral(&time, SyncConfig::default(), master_link(&time), 0);
    assert!(matches!(
        device.run_peripheral_round(true, 0),
        Err(SyncError::InvalidCycleCount(0))
    ));
}

#[test]
fn test_threaded_pair_over_channels() {
    let (master_end, peripheral_end) = channel_pair();
    let epoch = Instant::now();
    let config = SyncConfig::new(500, 5).with_cycle_gap_ms(5);

    let master = thread::spawn(move || {
        let mut device = SyncDevice::new(
            Role::Master,
            config,
            master_end,
            raw_payload as fn(&Vec<u8>) -> &[u8],
            StdClock::new(epoch, 0),
            MockRtc::new(),
            StdDelay,
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Some(record) = device.poll_master().unwrap() {
                return Some(record);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    });

    let mut device = SyncDevice::new(
        Role::Peripheral,
        config,
        peripheral_end,
        raw_payload as fn(&Vec<u8>) -> &[u8],
        StdClock::new(epoch, 30_000),
        MockRtc::new(),
        StdDelay,
    )
    .unwrap();
    let report = device.synchronize(true).unwrap();
    let master_record = master.join().unwrap().unwrap();

    assert_eq!(master_record.len(), 5);
    assert!(report.correction.valid_samples >= 1);
    assert!((report.correction.offset_us - 30_000).abs() < 20_000);
}
