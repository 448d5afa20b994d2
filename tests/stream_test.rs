//! Integration tests for the streaming worker

use bme_window_agent::collector::ChannelSchema;
use bme_window_agent::core::{FeatureEngine, FeatureVector, Features, PipelineConfig, WindowedPipeline};
use bme_window_agent::labels::LabelCatalog;
use bme_window_agent::stats::StreamStats;
use bme_window_agent::stream::{
    Classifier, ClassifierError, CurrentPrediction, StopReason, StreamConfig, StreamController,
    StreamError, StreamEvent,
};
use chrono::Duration as ChronoDuration;
use crossbeam_channel::Receiver;
use std::io::{self, BufReader, Read};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Serves `data`, then stalls for `hold` before ending (or failing).
struct SlowSource {
    data: io::Cursor<Vec<u8>>,
    hold: Duration,
    fail: bool,
}

impl SlowSource {
    fn new(lines: &[String], hold: Duration, fail: bool) -> Self {
        let mut data = Vec::new();
        for line in lines {
            data.extend_from_slice(line.as_bytes());
            data.push(b'\n');
        }
        Self {
            data: io::Cursor::new(data),
            hold,
            fail,
        }
    }
}

impl Read for SlowSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        thread::sleep(self.hold);
        if self.fail {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "port unplugged"))
        } else {
            Ok(0)
        }
    }
}

/// "A" below a mean temperature of 4, "B" otherwise.
struct ThresholdClassifier;

impl Classifier for ThresholdClassifier {
    fn fit(&mut self, _samples: &[FeatureVector]) -> Result<(), ClassifierError> {
        Ok(())
    }

    fn predict(&self, features: &Features) -> Result<String, ClassifierError> {
        let mean = features
            .get("Temperature_Mean_Sensor1")
            .ok_or(ClassifierError::NoComparableFeatures)?;
        Ok(if mean < 4.0 { "A" } else { "B" }.to_string())
    }
}

/// One full single-sensor record at `secs` past midnight.
fn line(secs: u32) -> String {
    format!("2024-03-01T00:00:{secs:02}Z,{},1,HP-354,{secs},100000,40,5000,OK,1", secs * 1000)
}

fn controller(batch_length: Duration) -> StreamController {
    controller_with(StreamConfig {
        batch_length,
        poll_interval: Duration::from_millis(20),
        channel_capacity: 64,
        flush_on_close: false,
    })
}

fn controller_with(stream_config: StreamConfig) -> StreamController {
    let config = PipelineConfig::new(5.0, 1.0, ChronoDuration::seconds(10)).unwrap();
    let pipeline = WindowedPipeline::new(
        config,
        FeatureEngine::from_names(["Temperature_Mean_Sensor1"]),
        ChannelSchema::new(1),
    );
    StreamController::new(
        stream_config,
        pipeline,
        Arc::new(LabelCatalog::in_memory()),
        Arc::new(ThresholdClassifier),
        Arc::new(StreamStats::new()),
    )
}

fn first_prediction(events: &Receiver<StreamEvent>) -> Option<CurrentPrediction> {
    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(StreamEvent::Prediction(prediction)) => return Some(prediction),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

#[test]
fn test_batch_prediction_breakdown() {
    let lines: Vec<String> = (0..=7).map(line).collect();
    let source = SlowSource::new(&lines, Duration::from_millis(600), false);
    let mut controller = controller(Duration::from_millis(200));

    let events = controller.start_stream(BufReader::new(source)).unwrap();
    let prediction = first_prediction(&events).expect("no prediction published");

    // Windows start at 0, 1, 2 with means 2, 3, 4
    assert_eq!(prediction.to_string(), "A 66.7% / B 33.3%");
    assert_eq!(prediction.majority(), Some("A"));

    let report = controller.wait().unwrap();
    assert_eq!(report.reason, StopReason::SourceClosed);
    assert!(report.batches >= 1);

    let snapshot = controller.stats().snapshot();
    assert_eq!(snapshot.lines_received, 8);
    assert_eq!(snapshot.readings_accepted, 8);
    assert_eq!(snapshot.vectors_produced, 3);
    assert_eq!(snapshot.predictions_made, 3);
}

#[test]
fn test_raw_lines_are_echoed() {
    let lines: Vec<String> = (0..3).map(line).collect();
    let source = SlowSource::new(&lines, Duration::from_millis(50), false);
    let mut controller = controller(Duration::from_secs(10));

    let events = controller.start_stream(BufReader::new(source)).unwrap();
    let report = controller.wait().unwrap();

    let echoed: Vec<String> = events
        .try_iter()
        .filter_map(|e| match e {
            StreamEvent::RawLine(raw) => Some(raw),
            _ => None,
        })
        .collect();
    assert_eq!(echoed, lines);
    // The batch never came due, so its readings are dropped at stop
    assert_eq!(report.discarded, 3);
    assert_eq!(report.batches, 0);
}

#[test]
fn test_finite_replay_classifies_remaining_readings() {
    let mut replay = String::new();
    for secs in 0..60 {
        replay.push_str(&line(secs));
        replay.push('\n');
    }
    let mut controller = controller_with(StreamConfig {
        batch_length: Duration::from_secs(30),
        poll_interval: Duration::from_millis(20),
        channel_capacity: 128,
        flush_on_close: true,
    });

    let events = controller.start_stream(io::Cursor::new(replay)).unwrap();
    let report = controller.wait().unwrap();

    let predictions: Vec<CurrentPrediction> = events
        .try_iter()
        .filter_map(|e| match e {
            StreamEvent::Prediction(prediction) => Some(prediction),
            _ => None,
        })
        .collect();
    assert_eq!(predictions.len(), 1);
    // Starts 0 and 1 have means below 4; the other 53 windows do not
    assert_eq!(predictions[0].majority(), Some("B"));
    assert_eq!(report.reason, StopReason::SourceClosed);
    assert_eq!(report.batches, 1);
    assert_eq!(report.discarded, 0);

    let snapshot = controller.stats().snapshot();
    assert_eq!(snapshot.readings_accepted, 60);
    assert_eq!(snapshot.vectors_produced, 55);
    assert_eq!(snapshot.discarded_at_stop, 0);
}

#[test]
fn test_malformed_lines_are_counted_and_dropped() {
    let lines = vec![
        line(0),
        "garbage".to_string(),
        "1,2,3".to_string(),
        line(1),
    ];
    let source = SlowSource::new(&lines, Duration::from_millis(50), false);
    let mut controller = controller(Duration::from_secs(10));

    controller.start_stream(BufReader::new(source)).unwrap();
    let report = controller.wait().unwrap();

    let snapshot = controller.stats().snapshot();
    assert_eq!(snapshot.lines_received, 4);
    assert_eq!(snapshot.malformed_dropped, 2);
    assert_eq!(snapshot.readings_accepted, 2);
    assert_eq!(report.discarded, 2);
}

#[test]
fn test_transport_failure_is_fatal() {
    let lines: Vec<String> = (0..2).map(line).collect();
    let source = SlowSource::new(&lines, Duration::from_millis(50), true);
    let mut controller = controller(Duration::from_secs(10));

    let events = controller.start_stream(BufReader::new(source)).unwrap();
    let result = controller.wait();

    assert!(matches!(result, Err(StreamError::Transport(_))));
    let fatal = events
        .try_iter()
        .any(|e| matches!(e, StreamEvent::Fatal(_)));
    assert!(fatal);
}

#[test]
fn test_stop_is_requested_and_discards_batch() {
    let lines: Vec<String> = (0..4).map(line).collect();
    let source = SlowSource::new(&lines, Duration::from_secs(2), false);
    let mut controller = controller(Duration::from_secs(10));

    let events = controller.start_stream(BufReader::new(source)).unwrap();
    // Wait until every line has reached the worker
    let mut seen = 0;
    while seen < 4 {
        if let Ok(StreamEvent::RawLine(_)) = events.recv_timeout(Duration::from_secs(5)) {
            seen += 1;
        }
    }

    assert!(controller.is_running());
    let report = controller.stop_stream().unwrap();

    assert_eq!(report.reason, StopReason::Requested);
    assert_eq!(report.discarded, 4);
    assert!(!controller.is_running());
    assert!(matches!(controller.stop_stream(), Err(StreamError::NotRunning)));
}

#[test]
fn test_second_start_is_rejected() {
    let lines: Vec<String> = (0..2).map(line).collect();
    let mut controller = controller(Duration::from_secs(10));

    controller
        .start_stream(BufReader::new(SlowSource::new(&lines, Duration::from_secs(2), false)))
        .unwrap();
    let second = controller.start_stream(BufReader::new(SlowSource::new(&lines, Duration::ZERO, false)));

    assert!(matches!(second, Err(StreamError::AlreadyRunning)));
    controller.stop_stream().unwrap();
}

#[test]
fn test_empty_batch_reports_no_features() {
    // Too few readings for any window
    let lines: Vec<String> = (0..2).map(line).collect();
    let source = SlowSource::new(&lines, Duration::from_millis(400), false);
    let mut controller = controller(Duration::from_millis(100));

    let events = controller.start_stream(BufReader::new(source)).unwrap();
    let prediction = first_prediction(&events).expect("no prediction published");

    assert_eq!(prediction, CurrentPrediction::NoFeatures);
    controller.wait().unwrap();
}
