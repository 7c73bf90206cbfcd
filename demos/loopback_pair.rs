//! Master and peripheral on one host
//!
//! Runs both ends of the protocol in separate threads joined by an
//! in-memory link that adds a few milliseconds of latency each way. The
//! peripheral's clock starts 40 ms ahead; after one round its RTC is pulled
//! back by about that much.
//!
//! Run with `cargo run --example loopback_pair --features std`, and set
//! `RUST_LOG=debug` to see every message.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use embedded_hal::blocking::delay::DelayMs;
use ptp_sync::{
    clock::{RealTimeClock, TimestampSource},
    config::SyncConfig,
    device::{Role, SyncDevice},
    radio::{ChannelInfo, RadioLink},
};

const LINK_LATENCY: Duration = Duration::from_millis(4);
const PERIPHERAL_SKEW_US: i64 = 40_000;

#[derive(Debug)]
struct Disconnected;

/// Frame tagged with the instant it may be delivered
struct Frame {
    due: Instant,
    data: Vec<u8>,
}

fn frame_data(frame: &Frame) -> &[u8] {
    &frame.data
}

/// In-memory link with fixed one-way latency
struct LoopbackLink {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    held: Option<Frame>,
    channel: u8,
}

impl LoopbackLink {
    fn pair(channel: u8) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self {
                tx: a_tx,
                rx: a_rx,
                held: None,
                channel,
            },
            Self {
                tx: b_tx,
                rx: b_rx,
                held: None,
                channel,
            },
        )
    }
}

impl RadioLink for LoopbackLink {
    type Envelope = Frame;
    type Error = Disconnected;

    fn send(&mut self, payload: &[u8]) -> Result<(), Disconnected> {
        let frame = Frame {
            due: Instant::now() + LINK_LATENCY,
            data: payload.to_vec(),
        };
        self.tx.send(frame).map_err(|_| Disconnected)
    }

    fn receive(&mut self) -> nb::Result<Frame, Disconnected> {
        let frame = match self.held.take() {
            Some(frame) => frame,
            None => match self.rx.try_recv() {
                Ok(frame) => frame,
                Err(TryRecvError::Empty) => return Err(nb::Error::WouldBlock),
                Err(TryRecvError::Disconnected) => return Err(nb::Error::Other(Disconnected)),
            },
        };
        if frame.due > Instant::now() {
            self.held = Some(frame);
            return Err(nb::Error::WouldBlock);
        }
        Ok(frame)
    }

    fn channel_info(&self) -> ChannelInfo {
        ChannelInfo::new(self.channel, [0; 6])
    }
}

/// Microseconds since a shared epoch, plus a skew
struct HostTicks {
    epoch: Instant,
    skew_us: i64,
}

impl TimestampSource for HostTicks {
    fn now_us(&mut self) -> u64 {
        (self.epoch.elapsed().as_micros() as i64 + self.skew_us) as u64
    }
}

/// RTC kept in memory
struct SoftRtc {
    now: NaiveDateTime,
}

impl RealTimeClock for SoftRtc {
    type Error = core::convert::Infallible;

    fn datetime(&mut self) -> Result<NaiveDateTime, Self::Error> {
        Ok(self.now)
    }

    fn set_datetime(&mut self, datetime: NaiveDateTime) -> Result<(), Self::Error> {
        self.now = datetime;
        Ok(())
    }
}

fn start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

struct ThreadDelay;

impl DelayMs<u32> for ThreadDelay {
    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let (master_link, peripheral_link) = LoopbackLink::pair(6);
    let epoch = Instant::now();
    let config = SyncConfig::new(500, 8);

    let master = thread::spawn(move || {
        let mut device = match SyncDevice::new(
            Role::Master,
            config,
            master_link,
            frame_data,
            HostTicks { epoch, skew_us: 0 },
            SoftRtc { now: start_time() },
            ThreadDelay,
        ) {
            Ok(device) => device,
            Err(e) => {
                eprintln!("master setup failed: {}", e);
                return;
            }
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match device.poll_master() {
                Ok(Some(record)) => {
                    println!(
                        "master: served round with {}/{} cycles completed",
                        record.completed(),
                        record.len()
                    );
                    return;
                }
                Ok(None) => thread::sleep(Duration::from_millis(1)),
                Err(e) => {
                    eprintln!("master error: {}", e);
                    return;
                }
            }
        }
        eprintln!("master: no sync request received");
    });

    let started = start_time();
    let mut peripheral = match SyncDevice::new(
        Role::Peripheral,
        config,
        peripheral_link,
        frame_data,
        HostTicks {
            epoch,
            skew_us: PERIPHERAL_SKEW_US,
        },
        SoftRtc { now: started },
        ThreadDelay,
    ) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("peripheral setup failed: {}", e);
            return;
        }
    };

    match peripheral.synchronize(true) {
        Ok(report) => {
            println!(
                "peripheral: offset {} us from {}/{} samples, {:?}",
                report.correction.offset_us,
                report.correction.valid_samples,
                report.correction.total_cycles,
                report.applied
            );
            let moved = peripheral.rtc().now - started;
            println!("peripheral: rtc moved by {} us", moved.num_microseconds().unwrap_or(0));
        }
        Err(e) => eprintln!("peripheral sync failed: {}", e),
    }

    master.join().ok();
}
