use std::error::Error;
use std::io;
use std::sync::Arc;

use tracing::warn;

use crate::api::{parse_failure_message, transport_failure_message};
use crate::decoder::{Decoder, LineDecoder, Recoder, UNKNOWN_SOURCE};
use crate::disposition::{route, BlockCause, BlockReason, Disposition};
use crate::preprocessor::{RuleChain, RuleChainSource};
use crate::prometheus::{report_payload, report_received_points, report_transport_error};
use crate::sinks::PointSink;
use crate::time::SystemTime;

/// Per-payload facts handed down to the rule chain.
#[derive(Clone, Copy, Debug)]
pub struct PayloadContext<'a> {
    pub source: &'a str,
    pub remote: Option<&'a str>,
}

/// Entry point for raw payloads: decode, run the rule chain and route
/// every resulting point.
///
/// Holds no per-payload state, so one handler is shared by all
/// connections.
pub struct PayloadHandler {
    decoder: Arc<dyn Decoder>,
    recoder: Arc<dyn Recoder>,
    rules: Option<Arc<dyn RuleChainSource>>,
    identity: Arc<RuleChain>,
    sink: Arc<dyn PointSink>,
}

impl PayloadHandler {
    pub fn new<D, S>(decoder: D, sink: S) -> Self
    where
        D: Decoder + 'static,
        S: PointSink + 'static,
    {
        Self {
            decoder: Arc::new(decoder),
            recoder: Arc::new(LineDecoder::new(SystemTime {})),
            rules: None,
            identity: Arc::new(RuleChain::identity()),
            sink: Arc::new(sink),
        }
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleChainSource>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_recoder(mut self, recoder: impl Recoder + 'static) -> Self {
        self.recoder = Arc::new(recoder);
        self
    }

    /// Processes one framed payload. Never fails: every problem ends up
    /// in the logs and/or the block sink.
    pub fn ingest(&self, payload: &[u8], remote: Option<&str>) {
        if payload.is_empty() {
            return;
        }
        report_payload(payload.len());

        let chain = self.rule_chain();
        let points = match self.decoder.decode(payload, UNKNOWN_SOURCE) {
            Ok(points) => points,
            Err(err) => {
                let message = parse_failure_message(&String::from_utf8_lossy(payload), &err, remote);
                route(
                    self.sink.as_ref(),
                    Disposition::Block {
                        point: None,
                        reason: BlockReason::Diagnostic(message),
                        cause: BlockCause::ParseError,
                    },
                );
                return;
            }
        };
        report_received_points(points.len() as u64);

        let ctx = PayloadContext {
            source: UNKNOWN_SOURCE,
            remote,
        };
        for point in points {
            chain.apply(point, self.recoder.as_ref(), &ctx, |disposition| {
                route(self.sink.as_ref(), disposition)
            });
        }
    }

    /// Logs an error raised by the connection. Nothing reaches the block
    /// sink since no point exists; peers resetting the connection are
    /// not worth a log line.
    pub fn handle_transport_error(&self, err: &(dyn Error + 'static), remote: Option<&str>) {
        if is_connection_reset(err) {
            report_transport_error("reset");
            return;
        }
        report_transport_error("other");
        warn!("{}", transport_failure_message(err, remote));
    }

    fn rule_chain(&self) -> Arc<RuleChain> {
        match &self.rules {
            Some(rules) => rules.current(),
            None => self.identity.clone(),
        }
    }
}

fn is_connection_reset(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionReset {
                return true;
            }
            // io::Error hides a wrapped error from source()
            if let Some(inner) = io_err.get_ref() {
                if is_connection_reset(inner) {
                    return true;
                }
            }
        }
        if err.to_string().contains("Connection reset by peer") {
            return true;
        }
        current = err.source();
    }
    false
}
