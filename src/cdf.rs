//! Latency CDFs (glossary: "characterised by centre, width, and tail
//! parameters"). Networks and links each carry one of these for drawing a
//! latency sample per packet (spec §4.4).

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A latency distribution, modelled as a left-truncated normal: `centre`
/// and `width` set the bulk of the mass, `tail` stretches the upper bound
/// to approximate the heavy tail real network RTTs show under load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cdf {
    centre_ns: f64,
    width_ns: f64,
    tail: f64,
    /// Hard floor under which no sample is ever returned, enforced so
    /// runahead accounting never sees a latency shorter than the
    /// configured minimum (spec: "latency samples >= runahead floor").
    floor_ns: f64,
}

impl Cdf {
    pub fn new(centre: Duration, width: Duration, tail: f64, floor: Duration) -> Self {
        Self {
            centre_ns: centre.as_nanos() as f64,
            width_ns: width.as_nanos() as f64,
            tail: tail.max(1.0),
            floor_ns: floor.as_nanos() as f64,
        }
    }

    /// A degenerate CDF that always returns exactly `latency`.
    pub fn constant(latency: Duration) -> Self {
        Self::new(latency, Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// The distribution's centre, clamped to the floor. Used where a
    /// deterministic point estimate is needed instead of a random draw
    /// (e.g. the scheduler's static runahead floor at topology load time).
    pub fn centre(&self) -> Duration {
        Duration::from_nanos(self.centre_ns.max(self.floor_ns) as u64)
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        if self.width_ns == 0.0 {
            return Duration::from_nanos(self.centre_ns.max(self.floor_ns) as u64);
        }
        let normal = Normal::new(self.centre_ns, self.width_ns).expect("finite centre/width");
        let tail_bias: f64 = rng.gen_range(0.0..1.0);
        let sample = normal.sample(rng) + tail_bias.powf(self.tail) * self.width_ns;
        let clamped = sample.max(self.floor_ns);
        Duration::from_nanos(clamped as u64)
    }
}
