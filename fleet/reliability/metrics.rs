use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::{
    classifier::{classify, counts_for_downtime, is_open},
    interval::{clamp_to_range, union_hours},
    model::{Category, Interval, Order, ReliabilityMetrics, ReliabilityWindow},
};

#[derive(Default)]
struct Bucket {
    intervals: Vec<Interval>,
    open: usize,
}

impl Bucket {
    fn push(&mut self, interval: Interval, open: bool) {
        self.intervals.push(interval);
        if open {
            self.open += 1;
        }
    }
}

/// Computes downtime, availability, MTTR and MTBF for one vehicle's orders.
///
/// Orders repeating an id already seen are ignored. Each category is merged on
/// its own, so ZF01/ZF03 work overlapping a failure never reduces ZF02 downtime.
#[must_use]
pub fn compute_metrics(
    orders: &[Order],
    window: &ReliabilityWindow,
    now: DateTime<Utc>,
) -> ReliabilityMetrics {
    let total_range_hours = window.total_hours();
    if window.is_degenerate() {
        return ReliabilityMetrics::idle(0.0);
    }

    let mut seen = HashSet::new();
    let mut corrective = Bucket::default();
    let mut project = Bucket::default();
    let mut preventive = Bucket::default();

    for order in orders {
        if !seen.insert(order.id.as_str()) {
            trace!(order = %order.id, "duplicate order id skipped");
            continue;
        }
        if !counts_for_downtime(order) {
            continue;
        }
        let Some(clamped) = clamp_to_range(order.start, order.end, window.from, window.to, now)
        else {
            continue;
        };
        let category = classify(order);
        trace!(
            order = %order.id,
            category = category.code(),
            hours = clamped.hours(),
            "order clamped to window"
        );
        match category {
            Category::Zf02 => corrective.push(clamped, is_open(order)),
            Category::Zf01 => project.push(clamped, false),
            Category::Zf03 => preventive.push(clamped, is_open(order)),
            Category::Unknown => {
                trace!(order = %order.id, "order without type code left out of totals");
            }
        }
    }

    let falhas = corrective.intervals.len();
    let downtime_total = union_hours(&corrective.intervals);
    let operational_hours = (total_range_hours - downtime_total)
        .min(total_range_hours)
        .max(0.0);
    let availability = if total_range_hours > 0.0 {
        (operational_hours / total_range_hours).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let (mttr, mtbf) = if falhas > 0 {
        let count = falhas as f64;
        (downtime_total / count, operational_hours / count)
    } else {
        (0.0, 0.0)
    };

    ReliabilityMetrics {
        falhas,
        downtime_total,
        total_range_hours,
        operational_hours,
        availability,
        mttr,
        mtbf,
        horas_zf01: union_hours(&project.intervals),
        horas_zf03: union_hours(&preventive.intervals),
        qtd_abertas_zf02: corrective.open,
        qtd_abertas_zf03: preventive.open,
    }
}
