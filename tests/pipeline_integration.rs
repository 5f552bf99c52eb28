//! End-to-end component behavior: providers (watchdog, filters),
//! transformers (cursor advance, trigger gating, shape mapping), consumers
//! (cadence, gap reporting) and event consumers.

mod common;

use common::mock_helpers::{
    AddOneTransform, DecimateTransform, RecordingSink, SilentSensor,
};
use common::{component_timeout, u8_shape, wait_until};
use sigflow_rs::{Registry, Stream, StreamEvent};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[test]
fn test_transformer_end_to_end() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let (transform, steps) = AddOneTransform::new();
    let output = registry
        .add_transformer(input, &[], Box::new(transform), "10", None, "2.0s", None)
        .unwrap();

    assert_eq!(registry.sample_rate(output).unwrap(), 100.0);

    registry.start().unwrap();
    let data: Vec<u8> = (0..20).collect();
    registry.push_data(input, &data, 20).unwrap();

    assert!(wait_until(component_timeout(), || {
        registry.write_position(output).unwrap() >= 20
    }));
    assert_eq!(steps.load(Ordering::SeqCst), 2);

    let mut out = Stream::new(u8_shape(100.0));
    registry.get_data(output, &mut out, 0.0, 0.2).unwrap();
    let expected: Vec<u8> = (1..21).collect();
    assert_eq!(out.bytes(), &expected[..]);

    registry.stop().unwrap();
}

#[test]
fn test_transformer_trigger_gating() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let trigger = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let (transform, steps) = AddOneTransform::new();
    let output = registry
        .add_transformer(
            input,
            &[],
            Box::new(transform),
            "10",
            None,
            "2.0s",
            Some(trigger),
        )
        .unwrap();

    registry.start().unwrap();

    // All-zero trigger window: the transform must not run, but the output
    // clock still advances by one frame of zeros.
    registry.push_data(trigger, &[0u8; 10], 10).unwrap();
    registry.push_data(input, &[7u8; 10], 10).unwrap();
    assert!(wait_until(component_timeout(), || {
        registry.write_position(output).unwrap() >= 10
    }));
    assert_eq!(steps.load(Ordering::SeqCst), 0);

    let mut out = Stream::new(u8_shape(100.0));
    registry.get_data(output, &mut out, 0.0, 0.1).unwrap();
    assert_eq!(out.bytes(), &[0u8; 10][..]);

    // Non-zero trigger: the second frame is transformed.
    registry.push_data(trigger, &[1u8; 10], 10).unwrap();
    registry.push_data(input, &[7u8; 10], 10).unwrap();
    assert!(wait_until(component_timeout(), || {
        registry.write_position(output).unwrap() >= 20
    }));
    assert_eq!(steps.load(Ordering::SeqCst), 1);
    registry.get_data(output, &mut out, 0.1, 0.1).unwrap();
    assert_eq!(out.bytes(), &[8u8; 10][..]);

    registry.stop().unwrap();
}

#[test]
fn test_transformer_derived_rate() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let output = registry
        .add_transformer(
            input,
            &[],
            Box::new(DecimateTransform),
            "10",
            None,
            "2.0s",
            None,
        )
        .unwrap();

    // count_out(10) == 5, so the output runs at half the input rate.
    assert_eq!(registry.sample_rate(output).unwrap(), 50.0);

    registry.start().unwrap();
    let data: Vec<u8> = (0..10).collect();
    registry.push_data(input, &data, 10).unwrap();

    assert!(wait_until(component_timeout(), || {
        registry.write_position(output).unwrap() >= 5
    }));
    let mut out = Stream::new(common::u8_shape(50.0));
    registry.get_data(output, &mut out, 0.0, 0.1).unwrap();
    assert_eq!(out.bytes(), &[0u8, 2, 4, 6, 8][..]);

    registry.stop().unwrap();
}

#[test]
fn test_metadata_flows_through_transformer_chain() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "1.0s").unwrap();
    registry.set_meta(input, b"origin=mic".to_vec()).unwrap();

    let (transform, _) = AddOneTransform::new();
    let output = registry
        .add_transformer(input, &[], Box::new(transform), "10", None, "1.0s", None)
        .unwrap();

    // Default rewrite forwards the upstream blob unchanged.
    assert_eq!(registry.meta(output).unwrap(), Some(b"origin=mic".to_vec()));
}

#[test]
fn test_consumer_cadence_and_order() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let (sink, record) = RecordingSink::new();
    registry
        .add_consumer(&[input], Box::new(sink), "10", None, Vec::new(), None)
        .unwrap();

    registry.start().unwrap();
    let data: Vec<u8> = (0..30).collect();
    registry.push_data(input, &data, 30).unwrap();

    assert!(wait_until(component_timeout(), || {
        record.lock().unwrap().consumed.len() >= 3
    }));
    registry.stop().unwrap();

    let record = record.lock().unwrap();
    assert!(record.entered);
    assert!(record.flushed);
    let windows = &record.consumed;
    assert_eq!(windows[0].1, data[0..10]);
    assert_eq!(windows[1].1, data[10..20]);
    assert_eq!(windows[2].1, data[20..30]);
    assert!((windows[0].0 - 0.0).abs() < 1e-9);
    assert!((windows[1].0 - 0.1).abs() < 1e-9);
    assert!((windows[2].0 - 0.2).abs() < 1e-9);
}

#[test]
fn test_consumer_trigger_skips_delivery_but_advances() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let trigger = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let (sink, record) = RecordingSink::new();
    registry
        .add_consumer(
            &[input],
            Box::new(sink),
            "10",
            None,
            Vec::new(),
            Some(trigger),
        )
        .unwrap();

    registry.start().unwrap();
    // First window gated off, second window gated on.
    registry.push_data(trigger, &[0u8; 10], 10).unwrap();
    registry.push_data(trigger, &[1u8; 10], 10).unwrap();
    registry.push_data(input, &[3u8; 10], 10).unwrap();
    registry.push_data(input, &[4u8; 10], 10).unwrap();

    assert!(wait_until(component_timeout(), || {
        !record.lock().unwrap().consumed.is_empty()
    }));
    registry.stop().unwrap();

    let record = record.lock().unwrap();
    assert!((record.consumed[0].0 - 0.1).abs() < 1e-9, "first delivery is the second window");
    assert_eq!(record.consumed[0].1, vec![4u8; 10]);
}

#[test]
fn test_consumer_per_stream_transform() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let (sink, record) = RecordingSink::new();
    let (transform, _) = AddOneTransform::new();
    registry
        .add_consumer(
            &[input],
            Box::new(sink),
            "10",
            None,
            vec![Some(Box::new(transform))],
            None,
        )
        .unwrap();

    registry.start().unwrap();
    registry.push_data(input, &[10u8; 10], 10).unwrap();

    assert!(wait_until(component_timeout(), || {
        !record.lock().unwrap().consumed.is_empty()
    }));
    registry.stop().unwrap();

    assert_eq!(record.lock().unwrap().consumed[0].1, vec![11u8; 10]);
}

#[test]
fn test_consumer_reports_gap_once_and_recovers() {
    let registry = Registry::with_defaults();
    // Tiny buffer: 20 samples at 1 kHz.
    let input = registry.add_buffer(u8_shape(1000.0), "20").unwrap();
    let (sink, record) = RecordingSink::new();
    registry
        .add_consumer(&[input], Box::new(sink), "10", None, Vec::new(), None)
        .unwrap();

    registry.start().unwrap();
    // One large burst evicts the consumer's first window outright.
    registry.push_data(input, &vec![1u8; 500], 500).unwrap();

    assert!(wait_until(component_timeout(), || {
        !record.lock().unwrap().failed.is_empty()
    }));
    registry.stop().unwrap();

    let record = record.lock().unwrap();
    let (time, gap) = record.failed[0];
    assert!(time < 0.01);
    assert!(gap > 0.0, "gap duration should be reported");
}

#[test]
fn test_provider_watchdog_substitutes_zeros() {
    let registry = Registry::with_defaults();
    let mut sensor = SilentSensor::new("skin", u8_shape(100.0));
    let buffer = registry
        .add_provider(&mut sensor, "skin", None, "10.0s", "50ms", "0")
        .unwrap();
    let handle = sensor.handle.clone();
    registry.add_sensor(Box::new(sensor)).unwrap();

    registry.start().unwrap();

    // No data provided: the watchdog must bridge the gap with zeros.
    assert!(wait_until(component_timeout(), || {
        registry.write_position(buffer).unwrap() >= 10
    }));
    let mut out = Stream::new(u8_shape(100.0));
    registry.get_data(buffer, &mut out, 0.0, 0.1).unwrap();
    assert_eq!(out.bytes(), &[0u8; 10][..]);

    // Real data resumes through the provider handle.
    let position = registry.write_position(buffer).unwrap();
    let handle = handle.lock().unwrap().clone().unwrap();
    assert!(handle.provide(&[9u8; 10], 10));
    assert!(registry.write_position(buffer).unwrap() >= position + 10);

    registry.stop().unwrap();
}

#[test]
fn test_provider_rejects_data_while_idle() {
    let registry = Registry::with_defaults();
    let mut sensor = SilentSensor::new("skin", u8_shape(100.0));
    registry
        .add_provider(&mut sensor, "skin", None, "10.0s", "0", "0")
        .unwrap();
    let handle = sensor.handle.lock().unwrap().clone().unwrap();
    assert!(!handle.provide(&[1u8; 10], 10));
}

#[test]
fn test_provider_filter_applies_before_push() {
    let registry = Registry::with_defaults();
    let mut sensor = SilentSensor::new("skin", u8_shape(100.0));
    let (filter, steps) = AddOneTransform::new();
    let buffer = registry
        .add_provider(&mut sensor, "skin", Some(Box::new(filter)), "10.0s", "0", "0")
        .unwrap();

    registry.start().unwrap();
    let handle = sensor.handle.lock().unwrap().clone().unwrap();
    assert!(handle.provide(&(0u8..10).collect::<Vec<_>>(), 10));
    assert_eq!(registry.write_position(buffer).unwrap(), 10);
    assert_eq!(steps.load(Ordering::SeqCst), 1);

    let mut out = Stream::new(u8_shape(100.0));
    registry.get_data(buffer, &mut out, 0.0, 0.1).unwrap();
    let expected: Vec<u8> = (1u8..11).collect();
    assert_eq!(out.bytes(), &expected[..]);
    registry.stop().unwrap();
}

#[test]
fn test_provider_forwards_channel_metadata() {
    let registry = Registry::with_defaults();
    let mut sensor = SilentSensor::with_meta("skin", u8_shape(100.0), b"gain=2".to_vec());
    let buffer = registry
        .add_provider(&mut sensor, "skin", None, "10.0s", "0", "0")
        .unwrap();
    assert_eq!(registry.meta(buffer).unwrap(), Some(b"gain=2".to_vec()));
}

#[test]
fn test_event_consumer_synchronous() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let (sink, record) = RecordingSink::new();
    let handle = registry
        .add_event_consumer(&[input], Box::new(sink), Vec::new(), false)
        .unwrap();

    registry.start().unwrap();
    let data: Vec<u8> = (0..20).collect();
    registry.push_data(input, &data, 20).unwrap();

    // Synchronous delivery happens on this thread, before send returns.
    handle.send(StreamEvent {
        time: 0.05,
        duration: 0.1,
    });
    {
        let record = record.lock().unwrap();
        assert_eq!(record.consumed.len(), 1);
        assert_eq!(record.consumed[0].1, data[5..15]);
    }
    registry.stop().unwrap();
}

#[test]
fn test_event_consumer_asynchronous() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let (sink, record) = RecordingSink::new();
    let handle = registry
        .add_event_consumer(&[input], Box::new(sink), Vec::new(), true)
        .unwrap();

    registry.start().unwrap();
    let data: Vec<u8> = (0..20).collect();
    registry.push_data(input, &data, 20).unwrap();

    handle.send(StreamEvent {
        time: 0.1,
        duration: 0.1,
    });
    assert!(wait_until(component_timeout(), || {
        !record.lock().unwrap().consumed.is_empty()
    }));
    registry.stop().unwrap();

    let record = record.lock().unwrap();
    assert_eq!(record.consumed[0].1, data[10..20]);
}

#[test]
fn test_event_consumer_blocks_until_window_exists() {
    let registry = Registry::with_defaults();
    let input = registry.add_buffer(u8_shape(100.0), "2.0s").unwrap();
    let (sink, record) = RecordingSink::new();
    let handle = registry
        .add_event_consumer(&[input], Box::new(sink), Vec::new(), true)
        .unwrap();

    registry.start().unwrap();
    // Event for a window that does not exist yet: the worker blocks until
    // the data arrives.
    handle.send(StreamEvent {
        time: 0.0,
        duration: 0.1,
    });
    std::thread::sleep(Duration::from_millis(50));
    assert!(record.lock().unwrap().consumed.is_empty());

    registry.push_data(input, &[6u8; 10], 10).unwrap();
    assert!(wait_until(component_timeout(), || {
        !record.lock().unwrap().consumed.is_empty()
    }));
    registry.stop().unwrap();

    assert_eq!(record.lock().unwrap().consumed[0].1, vec![6u8; 10]);
}
