use proptest::prelude::*;

use ptp_sync::{
    clock::CounterWidth,
    config::{ConfigError, SyncConfig},
    protocol::{encode, is_protocol_message, parse, CodecError, MessageKind, SyncMessage},
    sync::{
        calculate_offset, process_offsets, process_offsets_with, FilterError, FilterPolicy,
        OffsetCalculator, OffsetSample, SampleError, TimestampQuad, MAX_SYNC_CYCLES,
    },
};

fn any_message() -> impl Strategy<Value = SyncMessage> {
    prop_oneof![
        (1u32..=u32::MAX).prop_map(|num_sync_cycles| SyncMessage::SyncRequest { num_sync_cycles }),
        (any::<u16>(), any::<u64>()).prop_map(|(sequence, t1)| SyncMessage::Sync { sequence, t1 }),
        (any::<u16>(), any::<u64>(), any::<u64>())
            .prop_map(|(sequence, t2, t3)| SyncMessage::DelayRequest { sequence, t2, t3 }),
        (any::<u16>(), any::<u64>(), any::<u64>())
            .prop_map(|(sequence, t1, t4)| SyncMessage::DelayResponse { sequence, t1, t4 }),
    ]
}

proptest! {
    #[test]
    fn prop_codec_round_trip(message in any_message()) {
        let frame = encode(&message);
        prop_assert!(is_protocol_message(&frame));
        prop_assert_eq!(frame.len(), message.kind().frame_len());
        prop_assert_eq!(parse(&frame), Ok(message));
    }

    #[test]
    fn prop_foreign_payloads_rejected(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        prop_assume!(!data.starts_with(b"<PTP>"));
        prop_assert!(!is_protocol_message(&data));
        prop_assert!(parse(&data).is_err());
    }

    #[test]
    fn prop_zero_delay_offset_is_exact(
        t1 in (1u64 << 32)..(1u64 << 48),
        offset in -(1i64 << 30)..(1i64 << 30),
        hold in 0u64..5_000_000,
    ) {
        // Zero transit time both ways, the peripheral holds for `hold`
        let t2 = (t1 as i64 + offset) as u64;
        let sample = calculate_offset(t1, t2, t2 + hold, t1 + hold).unwrap();
        prop_assert_eq!(sample.offset, offset);
        prop_assert_eq!(sample.delay, 0);
    }

    #[test]
    fn prop_filters_ignore_order(offsets in proptest::collection::vec(-1_000_000i64..1_000_000, 1..MAX_SYNC_CYCLES)) {
        let forward: Vec<Result<OffsetSample, SampleError>> = offsets.iter().map(|&offset| Ok(OffsetSample { offset, delay: 0 })).collect();
        let backward: Vec<_> = forward.iter().rev().cloned().collect();
        for policy in [FilterPolicy::Mean, FilterPolicy::Median, FilterPolicy::InterquartileMean] {
            prop_assert_eq!(
                process_offsets_with(&forward, &policy),
                process_offsets_with(&backward, &policy)
            );
        }
    }
}

#[test]
fn test_wire_sizes() {
    assert_eq!(MessageKind::SyncRequest.frame_len(), 14);
    assert_eq!(MessageKind::Sync.frame_len(), 16);
    assert_eq!(MessageKind::DelayRequest.frame_len(), 24);
    assert_eq!(MessageKind::DelayResponse.frame_len(), 24);
}

#[test]
fn test_oversized_frame_rejected() {
    let mut frame = encode(&SyncMessage::Sync { sequence: 3, t1: 9 }).to_vec();
    frame.push(0);
    assert_eq!(
        parse(&frame),
        Err(CodecError::LengthMismatch {
            kind: MessageKind::Sync,
            expected: 16,
            actual: 17,
        })
    );
}

#[test]
fn test_happy_path_sample() {
    // 10 ms each way, peripheral answers after 500 us, clocks agree
    let sample = calculate_offset(1_000_000, 1_010_000, 1_010_500, 1_020_500).unwrap();
    assert_eq!(sample.offset, 0);
    assert_eq!(sample.delay, 10_000);
    assert_eq!(sample.round_trip(), 20_000);
}

#[test]
fn test_skewed_sample() {
    // Peripheral 50 ms ahead
    let sample = calculate_offset(1_000_000, 1_060_000, 1_060_000, 1_020_000).unwrap();
    assert_eq!(sample.offset, 50_000);
    assert_eq!(sample.delay, 10_000);
}

#[test]
fn test_filter_mean_of_three() {
    let samples: [Result<OffsetSample, SampleError>; 3] = [
        Ok(OffsetSample { offset: 100, delay: 10 }),
        Ok(OffsetSample { offset: 200, delay: 10 }),
        Ok(OffsetSample { offset: 300, delay: 10 }),
    ];
    assert_eq!(process_offsets(&samples), Ok(200));
}

#[test]
fn test_total_loss_has_no_samples() {
    let calc = OffsetCalculator::default();
    let lost = TimestampQuad {
        t1: Some(1_000),
        ..TimestampQuad::default()
    };
    let samples: Vec<_> = (0..3).map(|_| calc.calculate(&lost)).collect();
    assert!(samples.iter().all(|s| *s == Err(SampleError::Incomplete)));
    assert_eq!(process_offsets(&samples), Err(FilterError::NoValidSamples));
}

#[test]
fn test_calculator_on_wrapping_counter() {
    let width = CounterWidth::new(32).unwrap();
    let calc = OffsetCalculator::new(width, Some(50_000));

    // Both counters wrap inside the cycle
    let t1 = width.max_value() - 1_000;
    let t2 = width.max_value() - 500;
    let t3 = width.add(t2, 2_000);
    let t4 = width.add(t1, 3_000);
    let sample = calc.calculate(&TimestampQuad::new(t1, t2, t3, t4)).unwrap();
    assert_eq!(sample.delay, 500);
    assert_eq!(sample.offset, 0);
}

#[test]
fn test_config_builder() {
    let config = SyncConfig::new(250, 8)
        .with_poll_interval_ms(2)
        .with_cycle_gap_ms(10)
        .with_max_delay_us(40_000)
        .with_filter(FilterPolicy::Median);

    assert_eq!(config.timeout_ms, 250);
    assert_eq!(config.num_sync_cycles, 8);
    assert_eq!(config.poll_interval_ms, 2);
    assert_eq!(config.cycle_gap_ms, 10);
    assert_eq!(config.max_delay_us, Some(40_000));
    assert_eq!(config.filter, FilterPolicy::Median);
    assert_eq!(config.validate(), Ok(()));
    assert_eq!(
        SyncConfig::new(250, 64).validate(),
        Err(ConfigError::InvalidCycleCount(64))
    );
}
