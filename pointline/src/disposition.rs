use tracing::{info, warn};

use crate::point::Point;
use crate::prometheus::{report_blocked, report_reported};
use crate::sinks::PointSink;

/// Target of the blocked-points log, kept apart from the operational log
/// so it can be routed or silenced on its own.
pub const BLOCKED_POINTS_TARGET: &str = "raw_blocked_points";

/// Why a point was blocked. A diagnostic reason marks something an
/// operator should look at; an informational one is usually intentional
/// filtering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockReason {
    Diagnostic(String),
    Informational,
}

impl BlockReason {
    /// Empty messages carry no diagnostic value and are treated as absent.
    pub fn from_message(message: Option<String>) -> Self {
        match message {
            Some(message) if !message.is_empty() => BlockReason::Diagnostic(message),
            _ => BlockReason::Informational,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            BlockReason::Diagnostic(message) => Some(message),
            BlockReason::Informational => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BlockCause {
    ParseError,
    RecodeError,
    LineFilter,
    PointFilter,
    RulePanic,
}

impl BlockCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockCause::ParseError => "parse_error",
            BlockCause::RecodeError => "recode_error",
            BlockCause::LineFilter => "line_filter",
            BlockCause::PointFilter => "point_filter",
            BlockCause::RulePanic => "rule_panic",
        }
    }
}

/// Final outcome for one point. `Block` without a point means nothing
/// could be parsed.
#[derive(Clone, Debug, PartialEq)]
pub enum Disposition {
    Report(Point),
    Block {
        point: Option<Point>,
        reason: BlockReason,
        cause: BlockCause,
    },
}

/// Delivers a disposition to exactly one side of the sink.
pub fn route(sink: &dyn PointSink, disposition: Disposition) {
    match disposition {
        Disposition::Report(point) => {
            report_reported(1);
            sink.report(point);
        }
        Disposition::Block {
            point,
            reason,
            cause,
        } => {
            report_blocked(cause.as_str(), 1);
            match (&point, &reason) {
                (Some(point), BlockReason::Diagnostic(_)) => {
                    warn!(target: BLOCKED_POINTS_TARGET, "{}", point.to_line())
                }
                (Some(point), BlockReason::Informational) => {
                    info!(target: BLOCKED_POINTS_TARGET, "{}", point.to_line())
                }
                // Nothing was parsed, there is no point line to log
                (None, reason) => warn!("{}", reason.message().unwrap_or(cause.as_str())),
            }
            sink.block(point, reason.message());
        }
    }
}
