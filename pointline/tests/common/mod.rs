#![allow(dead_code)]

use std::fmt::Debug;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use pointline::config::Config;
use pointline::decoder::{DecodeOutcome, Decoder, LineDecoder};
use pointline::point::Point;
use pointline::sinks::PointSink;
use pointline::time::FixedTime;

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| Config {
    address: SocketAddr::from_str("127.0.0.1:0").unwrap(),
    admin_address: SocketAddr::from_str("127.0.0.1:0").unwrap(),
    print_sink: false,
    export_prometheus: false,
    max_line_length: 1024,
    otel_url: None,
    otel_sampling_rate: 0.0,
    otel_service_name: "pointline-testing".to_string(),
    log_level: Level::INFO,
});

#[derive(Clone, Debug, PartialEq)]
pub enum SinkCall {
    Report(Point),
    Block(Option<Point>, Option<String>),
}

#[derive(Clone, Default)]
pub struct MemorySink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl MemorySink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn reported(&self) -> Vec<Point> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Report(point) => Some(point),
                SinkCall::Block(..) => None,
            })
            .collect()
    }

    pub fn blocked(&self) -> Vec<(Option<Point>, Option<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Block(point, reason) => Some((point, reason)),
                SinkCall::Report(_) => None,
            })
            .collect()
    }
}

impl PointSink for MemorySink {
    fn report(&self, point: Point) {
        self.calls.lock().unwrap().push(SinkCall::Report(point));
    }

    fn block(&self, point: Option<Point>, reason: Option<&str>) {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Block(point, reason.map(str::to_string)));
    }
}

/// Line decoder with a fixed clock that counts how often it is called.
#[derive(Clone)]
pub struct CountingDecoder {
    inner: Arc<LineDecoder<FixedTime>>,
    calls: Arc<AtomicUsize>,
}

impl Default for CountingDecoder {
    fn default() -> Self {
        Self {
            inner: Arc::new(fixed_decoder()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CountingDecoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Decoder for CountingDecoder {
    fn decode(&self, payload: &[u8], source: &str) -> DecodeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.decode(payload, source)
    }
}

pub fn fixed_decoder() -> LineDecoder<FixedTime> {
    LineDecoder::new(FixedTime {
        millis: 1_700_000_000_000,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Layer recording every event, to assert on what was logged.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl CapturedLogs {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.level == level)
            .collect()
    }

    /// Records above DEBUG, the ones operators would see.
    pub fn visible(&self) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.level <= Level::INFO)
            .collect()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.records.lock().unwrap().push(LogRecord {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        });
    }
}
