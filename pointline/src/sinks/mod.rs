use metrics::counter;

use crate::point::Point;

pub mod print;

/// Terminal collaborator for the pipeline. Called concurrently from every
/// connection; implementations must not block for long.
pub trait PointSink: Send + Sync {
    fn report(&self, point: Point);

    /// `point` is `None` when the payload could not be parsed at all.
    fn block(&self, point: Option<Point>, reason: Option<&str>);
}

/// Drops everything, only counting. Useful to measure the pipeline alone.
pub struct DiscardSink;

impl PointSink for DiscardSink {
    fn report(&self, point: Point) {
        drop(point);
        counter!("pointline_points_discarded_total").increment(1);
    }

    fn block(&self, point: Option<Point>, _reason: Option<&str>) {
        drop(point);
        counter!("pointline_points_discarded_total").increment(1);
    }
}
