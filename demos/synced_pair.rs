//! Two lock-stepped runtime instances over loopback UDP.
//!
//! Start the client first, then the server in a second terminal:
//!
//! ```text
//! cargo run --example synced_pair -- listen
//! cargo run --example synced_pair
//! ```
//!
//! The server counts down, announces RUN_AND_QUIT, runs for five seconds
//! and stops; the client starts and stops in lock-step with it.

use anyhow::Result;
use sigflow_rs::{ConsumeInfo, Registry, RuntimeOptions, Sink, Stream};
use std::sync::Arc;
use std::time::Duration;

struct CountSink {
    windows: usize,
}

impl Sink for CountSink {
    fn name(&self) -> &str {
        "count"
    }

    fn consume(&mut self, info: ConsumeInfo, _streams: &[Stream]) {
        self.windows += 1;
        if self.windows % 10 == 0 {
            tracing::info!("{} windows by t={:.1}s", self.windows, info.time);
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let listen = std::env::args().any(|a| a == "listen");

    let mut options = RuntimeOptions::default();
    options.sync.enabled = true;
    options.sync.listen = listen;
    options.sync.host = "127.0.0.1".to_string();
    if !listen {
        options.countdown = 2;
        options.runtime = 5.0;
    }
    let registry = Registry::new(options);

    // A tiny local pipeline on each station: a pushed counter stream and a
    // window-counting consumer.
    let shape = sigflow_rs::StreamShape::new(100.0, 1, sigflow_rs::SampleType::F32);
    let buffer = registry.add_buffer(shape, "10.0s")?;
    registry.add_consumer(
        &[buffer],
        Box::new(CountSink { windows: 0 }),
        "10",
        None,
        Vec::new(),
        None,
    )?;

    // Feeder thread: pushes a counter stream whenever the pipeline runs;
    // idle pushes are simply rejected.
    let stop_feeder = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let feeder_registry = Arc::clone(&registry);
    let feeder_stop = Arc::clone(&stop_feeder);
    let feeder = std::thread::spawn(move || {
        let mut value = 0f32;
        while !feeder_stop.load(std::sync::atomic::Ordering::Relaxed) {
            let bytes: Vec<u8> = (0..10)
                .map(|_| {
                    value += 1.0;
                    value
                })
                .flat_map(|v| v.to_ne_bytes())
                .collect();
            let _ = feeder_registry.push_data(buffer, &bytes, 10);
            std::thread::sleep(Duration::from_millis(100));
        }
    });

    loop {
        registry.start()?;
        registry.wait();
        registry.stop()?;
        if !registry.do_restart() {
            break;
        }
        tracing::info!("restart requested, looping the pipeline");
    }

    stop_feeder.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = feeder.join();
    registry.clear();
    Ok(())
}
