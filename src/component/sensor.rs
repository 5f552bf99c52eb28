//! Binds a sensor's connect/start/stop/disconnect lifecycle to the
//! pipeline run. The sensor pushes its samples through the provider handle
//! on its own; this thread only carries the lifecycle calls.

use crate::component::Runnable;
use crate::contract::Sensor;
use std::time::Duration;

const SENSOR_SLEEP: Duration = Duration::from_millis(100);

pub struct SensorRunner {
    sensor: Box<dyn Sensor>,
    name: String,
    live: bool,
}

impl SensorRunner {
    pub(crate) fn new(sensor: Box<dyn Sensor>) -> Self {
        let name = format!("sensor:{}", sensor.name());
        Self {
            sensor,
            name,
            live: false,
        }
    }
}

impl Runnable for SensorRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter(&mut self) {
        match self.sensor.connect().and_then(|_| self.sensor.start()) {
            Ok(()) => {
                self.live = true;
                tracing::info!("start '{}'", self.name);
            }
            Err(e) => tracing::warn!("sensor '{}' failed to start: {}", self.name, e),
        }
    }

    fn run(&mut self) {
        // The sensor delivers on its own cadence; nothing to drive here.
        std::thread::sleep(SENSOR_SLEEP);
    }

    fn flush(&mut self) {
        if self.live {
            if let Err(e) = self.sensor.stop().and_then(|_| self.sensor.disconnect()) {
                tracing::warn!("sensor '{}' failed to stop: {}", self.name, e);
            }
            self.live = false;
        }
        tracing::info!("stop '{}'", self.name);
    }
}
