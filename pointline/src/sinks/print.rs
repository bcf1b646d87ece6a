use metrics::counter;
use tracing::{debug, info};

use crate::point::Point;
use crate::sinks::PointSink;

pub struct PrintSink {}

impl PointSink for PrintSink {
    fn report(&self, point: Point) {
        info!("point: {}", point);
        counter!("pointline_points_ingested_total").increment(1);
    }

    fn block(&self, point: Option<Point>, reason: Option<&str>) {
        match point {
            Some(point) => debug!("blocked point: {} reason: {:?}", point, reason),
            None => debug!("blocked payload, reason: {:?}", reason),
        }
    }
}
