//! Lazy pay-share accrual.
//!
//! A participant's share grows at its own rate since the last time it was
//! touched; the global record grows at the sum of all participant rates.
//! Because projection is linear in elapsed time,
//!
//!   Σ_p share_p(t) == total_share(t)
//!
//! holds at any `t` as long as every change to a participant's rate is
//! reported to the global record in the same operation, and every share
//! removed from a participant (claim or reset) is removed from the total.

use serde::{Deserialize, Serialize};
use stakex_core::Timestamp;

/// Per-participant accrual record.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PayShare {
    pub share: f64,
    pub last_update: Timestamp,
}

impl PayShare {
    pub fn new(now: Timestamp) -> Self {
        Self { share: 0.0, last_update: now }
    }

    /// Accrue at `rate` (the rate that applied since `last_update`), then
    /// optionally reset to zero. Returns the accrued share before any reset.
    pub fn update(&mut self, now: Timestamp, rate: f64, reset: bool) -> f64 {
        let mut accrued = self.share;
        if rate > 0.0 && now > self.last_update {
            accrued += rate * (now - self.last_update) as f64;
        }
        self.share = if reset { 0.0 } else { accrued };
        self.last_update = now;
        accrued
    }

    /// Share the record would hold at `now` if it kept accruing at `rate`.
    pub fn projected(&self, now: Timestamp, rate: f64) -> f64 {
        if rate > 0.0 && now > self.last_update {
            self.share + rate * (now - self.last_update) as f64
        } else {
            self.share
        }
    }
}

/// Global accrual record of one reward stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PayShareTotals {
    pub total_share: f64,
    pub change_rate: f64,
    pub last_update: Timestamp,
}

impl PayShareTotals {
    /// Project the total to `now`, apply `share_delta` and `rate_delta`.
    /// Both the total and the rate clamp at zero. Returns the new total.
    pub fn update(&mut self, now: Timestamp, share_delta: f64, rate_delta: f64) -> f64 {
        let mut delta = share_delta;
        if now > self.last_update {
            delta += self.change_rate * (now - self.last_update) as f64;
        }

        if delta < 0.0 && self.total_share < -delta {
            self.total_share = 0.0;
        } else {
            self.total_share += delta;
        }

        if rate_delta < 0.0 && self.change_rate < -rate_delta {
            self.change_rate = 0.0;
        } else {
            self.change_rate += rate_delta;
        }

        self.last_update = now;
        self.total_share
    }

    pub fn projected(&self, now: Timestamp) -> f64 {
        if now > self.last_update {
            self.total_share + self.change_rate * (now - self.last_update) as f64
        } else {
            self.total_share
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn participant_accrues_linearly_and_resets() {
        let mut p = PayShare::new(100);
        assert_eq!(p.update(110, 2.0, false), 20.0);
        assert_eq!(p.update(115, 2.0, true), 30.0);
        assert_eq!(p.share, 0.0);
        assert_eq!(p.last_update, 115);
    }

    #[test]
    fn participant_never_decreases_from_time_alone() {
        let mut p = PayShare { share: 5.0, last_update: 100 };
        assert_eq!(p.update(90, 3.0, false), 5.0);
        assert_eq!(p.update(120, -1.0, false), 5.0);
    }

    #[test]
    fn totals_clamp_at_zero() {
        let mut t = PayShareTotals { total_share: 10.0, change_rate: 1.0, last_update: 0 };
        assert_eq!(t.update(5, -100.0, -3.0), 0.0);
        assert_eq!(t.change_rate, 0.0);
        assert_eq!(t.last_update, 5);
    }

    /// Random rate changes and claims keep the sum of projected participant
    /// shares equal to the projected total.
    #[test]
    fn sum_of_participants_tracks_total() {
        let mut rng = rand::thread_rng();
        let n = 12;
        let mut shares: Vec<PayShare> = (0..n).map(|_| PayShare::new(0)).collect();
        let mut rates = vec![0.0f64; n];
        let mut totals = PayShareTotals::default();
        let mut now: Timestamp = 0;
        let mut scale = 1.0f64;

        for _ in 0..2_000 {
            now += rng.gen_range(0..500);
            let i = rng.gen_range(0..n);
            if rng.gen_bool(0.2) {
                let claimed = shares[i].update(now, rates[i], true);
                totals.update(now, -claimed, 0.0);
            } else {
                let new_rate = rng.gen_range(0.0..1_000.0);
                shares[i].update(now, rates[i], false);
                totals.update(now, 0.0, new_rate - rates[i]);
                rates[i] = new_rate;
            }

            let probe = now + rng.gen_range(0..10_000);
            let sum: f64 = shares.iter().zip(&rates).map(|(s, r)| s.projected(probe, *r)).sum();
            let total = totals.projected(probe);
            scale = scale.max(total.abs());
            let tolerance = 1e-9 * scale;
            assert!((sum - total).abs() <= tolerance, "sum {sum} vs total {total}");
        }
    }
}
