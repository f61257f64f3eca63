//! Online per-metric accumulators backing the `stats` mapping source.
//!
//! The path's ingest thread feeds the metric set; hooks read it through
//! the [`SharedStats`] handle they receive at initialization.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Metrics tracked per path input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// One-way delay between origin and reception.
    OneWayDelay,
    /// Time between consecutive receptions.
    Gap,
    /// Samples arriving with a non-monotonic sequence number.
    Reordered,
    /// Samples dropped by hooks.
    Skipped,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::OneWayDelay,
        Metric::Gap,
        Metric::Reordered,
        Metric::Skipped,
    ];

    const fn index(self) -> usize {
        match self {
            Metric::OneWayDelay => 0,
            Metric::Gap => 1,
            Metric::Reordered => 2,
            Metric::Skipped => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown statistics metric")]
pub struct UnknownMetric;

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owd" => Ok(Metric::OneWayDelay),
            "gap" => Ok(Metric::Gap),
            "reordered" => Ok(Metric::Reordered),
            "skipped" => Ok(Metric::Skipped),
            _ => Err(UnknownMetric),
        }
    }
}

/// Aggregate selector, the `<agg>` component of a `stats` mapping token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Total,
    Last,
    Lowest,
    Highest,
    Mean,
    Var,
    Stddev,
}

impl FromStr for Aggregate {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total" => Ok(Aggregate::Total),
            "last" => Ok(Aggregate::Last),
            "lowest" => Ok(Aggregate::Lowest),
            "highest" => Ok(Aggregate::Highest),
            "mean" => Ok(Aggregate::Mean),
            "var" => Ok(Aggregate::Var),
            "stddev" => Ok(Aggregate::Stddev),
            _ => Err(UnknownMetric),
        }
    }
}

/// Running aggregate of one metric.
///
/// Welford's update keeps mean and variance numerically stable without
/// retaining observations.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    total: u64,
    last: f64,
    lowest: f64,
    highest: f64,
    mean: f64,
    m2: f64,
}

impl Histogram {
    pub fn update(&mut self, value: f64) {
        self.last = value;
        if self.total == 0 {
            self.lowest = value;
            self.highest = value;
        } else {
            self.lowest = self.lowest.min(value);
            self.highest = self.highest.max(value);
        }
        self.total += 1;

        let delta = value - self.mean;
        self.mean += delta / self.total as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub const fn total(&self) -> u64 {
        self.total
    }

    pub const fn last(&self) -> f64 {
        self.last
    }

    pub const fn lowest(&self) -> f64 {
        self.lowest
    }

    pub const fn highest(&self) -> f64 {
        self.highest
    }

    pub const fn mean(&self) -> f64 {
        self.mean
    }

    pub fn var(&self) -> f64 {
        if self.total < 2 {
            0.0
        } else {
            self.m2 / (self.total - 1) as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        self.var().sqrt()
    }

    pub fn aggregate(&self, agg: Aggregate) -> f64 {
        match agg {
            Aggregate::Total => self.total as f64,
            Aggregate::Last => self.last,
            Aggregate::Lowest => self.lowest,
            Aggregate::Highest => self.highest,
            Aggregate::Mean => self.mean,
            Aggregate::Var => self.var(),
            Aggregate::Stddev => self.stddev(),
        }
    }
}

/// The per-path metric set, shared between the routing threads and hooks.
pub type SharedStats = Arc<Mutex<Stats>>;

/// The per-path metric set.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    histograms: [Histogram; Metric::ALL.len()],
}

impl Stats {
    pub fn update(&mut self, metric: Metric, value: f64) {
        self.histograms[metric.index()].update(value);
    }

    pub fn histogram(&self, metric: Metric) -> &Histogram {
        &self.histograms[metric.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert_eq!("owd".parse::<Metric>(), Ok(Metric::OneWayDelay));
        assert_eq!("gap".parse::<Metric>(), Ok(Metric::Gap));
        assert!("latency".parse::<Metric>().is_err());
    }

    #[test]
    fn test_histogram_aggregates() {
        let mut h = Histogram::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            h.update(v);
        }

        assert_eq!(h.total(), 8);
        assert_eq!(h.last(), 9.0);
        assert_eq!(h.lowest(), 2.0);
        assert_eq!(h.highest(), 9.0);
        assert!((h.mean() - 5.0).abs() < 1e-12);
        // Sample variance of the classic data set.
        assert!((h.var() - 32.0 / 7.0).abs() < 1e-12);
        assert!((h.stddev() - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_histogram_single_value() {
        let mut h = Histogram::default();
        h.update(-3.0);
        assert_eq!(h.lowest(), -3.0);
        assert_eq!(h.highest(), -3.0);
        assert_eq!(h.var(), 0.0);
    }

    #[test]
    fn test_stats_routing() {
        let mut stats = Stats::default();
        stats.update(Metric::Gap, 0.02);
        stats.update(Metric::Gap, 0.04);
        assert_eq!(stats.histogram(Metric::Gap).total(), 2);
        assert_eq!(stats.histogram(Metric::OneWayDelay).total(), 0);
    }
}
