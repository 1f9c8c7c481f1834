use lumen_photos::services::{ThroughputMeter, percent_done};

#[test]
fn first_sample_sets_the_rate_directly() {
    let mut meter = ThroughputMeter::new();
    meter.record(10 * 1024 * 1024, 1.0);
    assert!((meter.bytes_per_sec() - 10.0 * 1024.0 * 1024.0).abs() < 1.0);
}

#[test]
fn later_samples_are_smoothed() {
    let mut meter = ThroughputMeter::with_alpha(0.5);
    meter.record(100, 1.0);
    meter.record(200, 1.0);
    // 0.5 * 200 + 0.5 * 100
    assert!((meter.bytes_per_sec() - 150.0).abs() < f64::EPSILON);
}

#[test]
fn zero_elapsed_windows_are_ignored() {
    let mut meter = ThroughputMeter::new();
    meter.record(100, 0.0);
    assert_eq!(meter.bytes_per_sec(), 0.0);
    meter.record(100, 1.0);
    meter.record(500, 0.0);
    assert!((meter.bytes_per_sec() - 100.0).abs() < f64::EPSILON);
}

#[test]
fn remaining_seconds_is_floored() {
    let mut meter = ThroughputMeter::new();
    meter.record(1000, 1.0);
    // 3 files of 500 bytes at 1000 B/s = 1.5s → floored to 1.
    assert_eq!(meter.remaining_seconds(3, 500.0), 1);
}

#[test]
fn remaining_seconds_is_zero_without_a_rate_or_work() {
    let meter = ThroughputMeter::new();
    assert_eq!(meter.remaining_seconds(100, 1024.0), 0);

    let mut with_rate = ThroughputMeter::new();
    with_rate.record(1000, 1.0);
    assert_eq!(with_rate.remaining_seconds(0, 1024.0), 0);
}

#[test]
fn percent_done_handles_empty_tasks() {
    assert_eq!(percent_done(0, 0), 100.0);
    assert_eq!(percent_done(0, 10), 0.0);
    assert_eq!(percent_done(5, 10), 50.0);
    assert_eq!(percent_done(10, 10), 100.0);
}
