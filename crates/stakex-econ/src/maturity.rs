//! Maturity buckets of a REX holding.
//!
//! Shares bought on a given day sit in a bucket dated the end of that day
//! plus the maturity period; once the date passes they become sellable
//! (`matured`). A separate savings amount never matures until it is moved
//! back into a fresh bucket.
//!
//! Invariant: `matured + savings + Σ buckets` equals the holding's share balance.

use serde::{Deserialize, Serialize};
use stakex_core::constants::SECONDS_PER_DAY;
use stakex_core::{StakexError, Timestamp};
use std::collections::VecDeque;

/// Maturity date for shares acquired at `now`: end of the current day
/// plus `days` whole days.
pub fn maturity_date(now: Timestamp, days: i64) -> Timestamp {
    now - now.rem_euclid(SECONDS_PER_DAY) + (days + 1) * SECONDS_PER_DAY
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MaturityBuckets {
    pub matured: i64,
    pub savings: i64,
    /// `(maturity date, amount)`, oldest first, at most one per date.
    pub buckets: VecDeque<(Timestamp, i64)>,
}

impl MaturityBuckets {
    pub fn unvested(&self) -> i64 {
        self.buckets.iter().map(|(_, amount)| amount).sum()
    }

    pub fn total(&self) -> i64 {
        self.matured + self.savings + self.unvested()
    }

    /// Add `amount` maturing at `maturity`, merging with the youngest
    /// bucket when it carries the same date.
    pub fn add(&mut self, maturity: Timestamp, amount: i64) {
        if amount <= 0 {
            return;
        }
        match self.buckets.back_mut() {
            Some((date, held)) if *date == maturity => *held += amount,
            _ => self.buckets.push_back((maturity, amount)),
        }
    }

    /// Move every bucket whose date has passed into `matured`.
    pub fn process(&mut self, now: Timestamp) {
        while let Some(&(date, amount)) = self.buckets.front() {
            if date > now {
                break;
            }
            self.matured += amount;
            self.buckets.pop_front();
        }
    }

    /// Remove `amount` from the holding: matured shares first, then
    /// buckets oldest first. Savings are never touched.
    pub fn take(&mut self, amount: i64) -> Result<(), StakexError> {
        let available = self.matured + self.unvested();
        if amount < 0 || amount > available {
            return Err(StakexError::InsufficientShares { requested: amount, available });
        }
        let from_matured = amount.min(self.matured);
        self.matured -= from_matured;
        let mut remaining = amount - from_matured;
        while remaining > 0 {
            let Some((_, held)) = self.buckets.front_mut() else { break };
            let d = remaining.min(*held);
            *held -= d;
            remaining -= d;
            if *held == 0 {
                self.buckets.pop_front();
            }
        }
        Ok(())
    }

    /// Freeze `amount` into savings, taking from the youngest buckets first
    /// and from matured shares last.
    pub fn move_to_savings(&mut self, amount: i64) -> Result<(), StakexError> {
        let available = self.matured + self.unvested();
        if amount <= 0 || amount > available {
            return Err(StakexError::InsufficientShares { requested: amount, available });
        }
        let mut moved = 0;
        while moved < amount {
            let Some((_, held)) = self.buckets.back_mut() else { break };
            let d = (amount - moved).min(*held);
            *held -= d;
            moved += d;
            if *held == 0 {
                self.buckets.pop_back();
            }
        }
        self.matured -= amount - moved;
        self.savings += amount;
        Ok(())
    }

    /// Release `amount` from savings into a bucket maturing at `maturity`.
    pub fn move_from_savings(&mut self, amount: i64, maturity: Timestamp) -> Result<(), StakexError> {
        if amount <= 0 || amount > self.savings {
            return Err(StakexError::InsufficientSavings { requested: amount, saved: self.savings });
        }
        self.savings -= amount;
        self.add(maturity, amount);
        Ok(())
    }
}
