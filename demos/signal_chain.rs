//! A self-contained pipeline: a synthetic sine sensor feeds a provider,
//! an RMS transformer derives a feature stream, and a console sink prints
//! the result.
//!
//! Run with: cargo run --example signal_chain

use anyhow::Result;
use sigflow_rs::{
    ChannelSpec, ConsumeInfo, FrameInfo, ProviderHandle, Registry, RuntimeOptions, SampleType,
    Sensor, Sink, Stream, StreamShape, Transform,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RATE: f64 = 1600.0;
const CHUNK: usize = 16;

/// Synthetic sensor producing a 50 Hz sine on its own thread.
struct SineSensor {
    handle: Option<ProviderHandle>,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SineSensor {
    fn new() -> Self {
        Self {
            handle: None,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl Sensor for SineSensor {
    fn name(&self) -> &str {
        "sine"
    }

    fn channels(&self) -> Vec<ChannelSpec> {
        vec![ChannelSpec::new(
            "wave",
            StreamShape::new(RATE, 1, SampleType::F32),
        )]
    }

    fn set_provider(&mut self, channel: &str, provider: ProviderHandle) -> bool {
        if channel == "wave" {
            self.handle = Some(provider);
            true
        } else {
            false
        }
    }

    fn connect(&mut self) -> sigflow_rs::Result<()> {
        Ok(())
    }

    fn start(&mut self) -> sigflow_rs::Result<()> {
        let Some(handle) = self.handle.clone() else {
            return Ok(());
        };
        let stop = Arc::clone(&self.stop);
        stop.store(false, Ordering::Relaxed);
        self.worker = Some(std::thread::spawn(move || {
            let mut t: u64 = 0;
            while !stop.load(Ordering::Relaxed) {
                let samples: Vec<f32> = (0..CHUNK)
                    .map(|i| {
                        let phase = (t + i as u64) as f64 / RATE;
                        (50.0 * std::f64::consts::TAU * phase).sin() as f32
                    })
                    .collect();
                let bytes: Vec<u8> = samples.iter().flat_map(|v| v.to_ne_bytes()).collect();
                handle.provide(&bytes, CHUNK);
                t += CHUNK as u64;
                std::thread::sleep(Duration::from_millis(10));
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> sigflow_rs::Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }

    fn disconnect(&mut self) -> sigflow_rs::Result<()> {
        Ok(())
    }
}

/// One RMS value per frame: a feature transform shrinking rate by the
/// frame size.
struct RmsTransform;

impl Transform for RmsTransform {
    fn name(&self) -> &str {
        "rms"
    }

    fn count_out(&self, _count_in: usize) -> usize {
        1
    }

    fn step(&mut self, _info: FrameInfo, input: &Stream, output: &mut Stream, _extra: &[Stream]) {
        let mut sum = 0.0f64;
        let mut n = 0usize;
        for chunk in input.bytes().chunks_exact(4) {
            let v = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64;
            sum += v * v;
            n += 1;
        }
        let rms = if n > 0 { (sum / n as f64).sqrt() as f32 } else { 0.0 };
        output.bytes_mut().copy_from_slice(&rms.to_ne_bytes());
    }
}

struct ConsoleSink;

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn consume(&mut self, info: ConsumeInfo, streams: &[Stream]) {
        let bytes = streams[0].bytes();
        let rms = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        tracing::info!("t={:6.2}s rms={:.4}", info.time, rms);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut options = RuntimeOptions::default();
    options.runtime = 3.0;
    let registry = Registry::new(options);

    let mut sensor = SineSensor::new();
    let wave = registry.add_provider(&mut sensor, "wave", None, "10.0s", "1.0s", "5.0s")?;
    registry.add_sensor(Box::new(sensor))?;

    let rms = registry.add_transformer(
        wave,
        &[],
        Box::new(RmsTransform),
        "0.1s",
        None,
        "10.0s",
        None,
    )?;
    registry.add_consumer(&[rms], Box::new(ConsoleSink), "1", None, Vec::new(), None)?;

    registry.start()?;
    registry.wait();
    registry.stop()?;
    registry.clear();
    Ok(())
}
