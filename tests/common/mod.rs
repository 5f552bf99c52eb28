//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod mock_helpers;

use sigflow_rs::{SampleType, StreamShape};
use std::time::{Duration, Instant};

/// Single-channel u8 shape, the workhorse of the byte-exact tests.
pub fn u8_shape(rate: f64) -> StreamShape {
    StreamShape::new(rate, 1, SampleType::U8)
}

pub fn f32_shape(rate: f64, dimension: usize) -> StreamShape {
    StreamShape::new(rate, dimension, SampleType::F32)
}

/// Poll `condition` until it holds or the timeout expires. Returns the
/// final evaluation.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Generous timeout for anything driven by a component thread.
pub fn component_timeout() -> Duration {
    Duration::from_secs(3)
}
