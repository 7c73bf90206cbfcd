//! PTP-style clock synchronization over a lossy radio link
//!
//! This crate implements a two-party time sync protocol between a master
//! (time source) and peripherals (time followers) connected by a
//! low-bandwidth, point-to-point radio link that may lose packets.
//!
//! Each round runs a number of cycles. In every cycle the master and the
//! peripheral exchange `Sync`, `DelayRequest` and `DelayResponse` messages,
//! collecting four timestamps from which offset and path delay follow. The
//! peripheral filters the per-cycle offsets and shifts its real-time clock
//! once per round.
//!
//! # Features
//! - Compact marker-prefixed wire format, no heap
//! - Wrap-safe timestamp arithmetic for narrow hardware counters
//! - Per-cycle validation and pluggable offset filters
//! - Cooperative, polling sequencers with bounded waits
//! - Hardware abstraction for the radio link, counter and RTC
//! - `no_std` by default
//!
//! # Example
//! ```no_run
//! use ptp_sync::{
//!     config::SyncConfig,
//!     device::{Role, SyncDevice},
//! };
//! # use ptp_sync::clock::{RealTimeClock, TimestampSource};
//! # use ptp_sync::radio::{ChannelInfo, RadioLink};
//! # struct Link;
//! # impl RadioLink for Link {
//! #     type Envelope = ([u8; 6], [u8; 32], usize);
//! #     type Error = ();
//! #     fn send(&mut self, _: &[u8]) -> Result<(), ()> { Ok(()) }
//! #     fn receive(&mut self) -> nb::Result<Self::Envelope, ()> { Err(nb::Error::WouldBlock) }
//! #     fn channel_info(&self) -> ChannelInfo { ChannelInfo::default() }
//! # }
//! # struct Ticks;
//! # impl TimestampSource for Ticks { fn now_us(&mut self) -> u64 { 0 } }
//! # struct Rtc;
//! # impl RealTimeClock for Rtc {
//! #     type Error = ();
//! #     fn datetime(&mut self) -> Result<chrono::NaiveDateTime, ()> { Err(()) }
//! #     fn set_datetime(&mut self, _: chrono::NaiveDateTime) -> Result<(), ()> { Ok(()) }
//! # }
//! # struct Delay;
//! # impl embedded_hal::blocking::delay::DelayMs<u32> for Delay { fn delay_ms(&mut self, _: u32) {} }
//! fn payload(envelope: &([u8; 6], [u8; 32], usize)) -> &[u8] {
//!     &envelope.1[..envelope.2]
//! }
//!
//! let config = SyncConfig::new(1_000, 15);
//! let mut device = SyncDevice::new(
//!     Role::Peripheral,
//!     config,
//!     Link,
//!     payload,
//!     Ticks,
//!     Rtc,
//!     Delay,
//! )
//! .unwrap();
//!
//! // Ask the master for a round and correct the RTC
//! let report = device.synchronize(true).unwrap();
//! let _ = report.correction.offset_us;
//! ```

#![warn(missing_docs)]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

/// Timestamp counters, the real-time clock and correction
pub mod clock;

/// Protocol configuration
pub mod config;

/// High-level sync device
pub mod device;

/// Wire messages
pub mod protocol;

/// Radio link abstraction
pub mod radio;

/// Sync rounds, offset calculation and filtering
pub mod sync;
