//! Hardware-independent core library for the Air-Sentinel monitor
//!
//! This crate contains all platform-agnostic logic for the particulate
//! monitor: the cooperative task scheduler, the dust sensor sampling
//! pipeline, the multi-tick calibration engine, the AQI band automation
//! state machine, storage record codecs and the application state that
//! ties them together.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod app_state;
pub mod automation;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod interface;
pub mod sampling;
pub mod scheduler;
pub mod sensors;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test_support;
