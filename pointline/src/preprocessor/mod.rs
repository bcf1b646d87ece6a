//! Rule chains applied to every decoded point.
//!
//! A [`RuleChain`] has two halves:
//!
//! - line rules, which see the canonical text line of a point (transformers)
//!   or only its metric name (filters). These exist for rules written
//!   against the text form of the protocol.
//! - point rules, which rewrite and filter the structured point.
//!
//! For each point the executor runs, in order: line transform + recode
//! (only if line transformers exist), line filter, point transform, point
//! filter. The first rejecting filter ends processing of that point.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::api::parse_failure_message;
use crate::decoder::Recoder;
use crate::disposition::{BlockCause, BlockReason, Disposition};
use crate::handler::PayloadContext;
use crate::point::Point;

pub mod rules;

#[derive(Clone, Debug, PartialEq)]
pub enum FilterResult {
    Allow,
    Block(BlockReason),
}

impl FilterResult {
    pub fn block(message: Option<String>) -> Self {
        FilterResult::Block(BlockReason::from_message(message))
    }
}

pub trait LineTransformer: Send + Sync {
    fn transform(&self, line: String) -> String;
}

/// Filters on the metric name only.
pub trait LineFilter: Send + Sync {
    fn filter(&self, metric: &str) -> FilterResult;
}

pub trait PointTransformer: Send + Sync {
    fn transform(&self, point: Point) -> Point;
}

pub trait PointFilter: Send + Sync {
    fn filter(&self, point: &Point) -> FilterResult;
}

impl<F: Fn(String) -> String + Send + Sync> LineTransformer for F {
    fn transform(&self, line: String) -> String {
        self(line)
    }
}

impl<F: Fn(&str) -> FilterResult + Send + Sync> LineFilter for F {
    fn filter(&self, metric: &str) -> FilterResult {
        self(metric)
    }
}

impl<F: Fn(Point) -> Point + Send + Sync> PointTransformer for F {
    fn transform(&self, point: Point) -> Point {
        self(point)
    }
}

impl<F: Fn(&Point) -> FilterResult + Send + Sync> PointFilter for F {
    fn filter(&self, point: &Point) -> FilterResult {
        self(point)
    }
}

#[derive(Default)]
pub struct LineRules {
    transformers: Vec<Box<dyn LineTransformer>>,
    filters: Vec<Box<dyn LineFilter>>,
}

impl LineRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transformer(mut self, transformer: impl LineTransformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn with_filter(mut self, filter: impl LineFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn has_transformers(&self) -> bool {
        !self.transformers.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty() && self.filters.is_empty()
    }

    pub fn transform(&self, line: String) -> String {
        self.transformers
            .iter()
            .fold(line, |line, transformer| transformer.transform(line))
    }

    pub fn filter(&self, metric: &str) -> FilterResult {
        for filter in &self.filters {
            if let FilterResult::Block(reason) = filter.filter(metric) {
                return FilterResult::Block(reason);
            }
        }
        FilterResult::Allow
    }
}

#[derive(Default)]
pub struct PointRules {
    transformers: Vec<Box<dyn PointTransformer>>,
    filters: Vec<Box<dyn PointFilter>>,
}

impl PointRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transformer(mut self, transformer: impl PointTransformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn with_filter(mut self, filter: impl PointFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty() && self.filters.is_empty()
    }

    pub fn transform(&self, point: Point) -> Point {
        self.transformers
            .iter()
            .fold(point, |point, transformer| transformer.transform(point))
    }

    pub fn filter(&self, point: &Point) -> FilterResult {
        for filter in &self.filters {
            if let FilterResult::Block(reason) = filter.filter(point) {
                return FilterResult::Block(reason);
            }
        }
        FilterResult::Allow
    }
}

/// An immutable set of rules. Payloads hold an `Arc` snapshot for their
/// whole run, so a chain is never observed half-replaced.
#[derive(Default)]
pub struct RuleChain {
    line: LineRules,
    point: PointRules,
}

impl RuleChain {
    pub fn new(line: LineRules, point: PointRules) -> Self {
        Self { line, point }
    }

    /// The chain used when no rules are configured: every point is reported unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        self.line.is_empty() && self.point.is_empty()
    }

    pub fn line(&self) -> &LineRules {
        &self.line
    }

    pub fn point(&self) -> &PointRules {
        &self.point
    }

    /// Runs the chain on one decoded point and hands every resulting
    /// disposition to `emit`, in order.
    ///
    /// Line transformers may turn one point into several (or none) once
    /// the rewritten line is recoded; each is filtered independently. A
    /// panicking rule only affects the point it was processing.
    pub fn apply<F>(&self, point: Point, recoder: &dyn Recoder, ctx: &PayloadContext, mut emit: F)
    where
        F: FnMut(Disposition),
    {
        if !self.line.has_transformers() {
            emit(self.isolated(point));
            return;
        }

        let line = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.line.transform(point.to_line())
        })) {
            Ok(line) => line,
            Err(_) => {
                emit(rule_panicked());
                return;
            }
        };

        match recoder.recode(&line, ctx.source) {
            Ok(points) if points.is_empty() => emit(Disposition::Block {
                point: None,
                reason: BlockReason::Diagnostic(parse_failure_message(
                    &line,
                    &EmptyRecode,
                    ctx.remote,
                )),
                cause: BlockCause::RecodeError,
            }),
            Ok(points) => {
                for point in points {
                    emit(self.isolated(point));
                }
            }
            Err(err) => emit(Disposition::Block {
                point: None,
                reason: BlockReason::Diagnostic(parse_failure_message(&line, &err, ctx.remote)),
                cause: BlockCause::RecodeError,
            }),
        }
    }

    fn isolated(&self, point: Point) -> Disposition {
        panic::catch_unwind(AssertUnwindSafe(|| self.filter_and_transform(point)))
            .unwrap_or_else(|_| rule_panicked())
    }

    fn filter_and_transform(&self, point: Point) -> Disposition {
        if let FilterResult::Block(reason) = self.line.filter(&point.metric) {
            return Disposition::Block {
                point: Some(point),
                reason,
                cause: BlockCause::LineFilter,
            };
        }

        let point = self.point.transform(point);
        if let FilterResult::Block(reason) = self.point.filter(&point) {
            return Disposition::Block {
                point: Some(point),
                reason,
                cause: BlockCause::PointFilter,
            };
        }

        Disposition::Report(point)
    }
}

/// A rewritten line that recodes to nothing would otherwise vanish
/// without reaching either sink.
#[derive(Debug, thiserror::Error)]
#[error("rewritten line contains no point")]
struct EmptyRecode;

fn rule_panicked() -> Disposition {
    Disposition::Block {
        point: None,
        reason: BlockReason::Diagnostic("Rule chain failed while processing point".to_string()),
        cause: BlockCause::RulePanic,
    }
}

/// Hands out the rule chain for a payload. Called once per payload, so
/// implementations must be cheap and must not block.
pub trait RuleChainSource: Send + Sync {
    fn current(&self) -> Arc<RuleChain>;
}

impl RuleChainSource for Arc<RuleChain> {
    fn current(&self) -> Arc<RuleChain> {
        self.clone()
    }
}

impl<F: Fn() -> Arc<RuleChain> + Send + Sync> RuleChainSource for F {
    fn current(&self) -> Arc<RuleChain> {
        self()
    }
}

/// Holds the live rule chain; `replace` takes effect for payloads that
/// start after it returns.
#[derive(Default)]
pub struct SharedRuleChain {
    current: ArcSwap<RuleChain>,
}

impl SharedRuleChain {
    pub fn new(chain: RuleChain) -> Self {
        Self {
            current: ArcSwap::from_pointee(chain),
        }
    }

    pub fn replace(&self, chain: RuleChain) {
        self.current.store(Arc::new(chain));
    }
}

impl RuleChainSource for SharedRuleChain {
    fn current(&self) -> Arc<RuleChain> {
        self.current.load_full()
    }
}
