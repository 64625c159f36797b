//! Shared test helpers for voxfit-ap integration tests

#![allow(dead_code, unused_imports)]

pub mod fake_device;
#[cfg(unix)]
pub mod fake_service;

pub use fake_device::{DeviceLog, FakeDevice, FakeHost};
#[cfg(unix)]
pub use fake_service::{fast_timings, start_fake_service, FakeService, StreamBehavior};
