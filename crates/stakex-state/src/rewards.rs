//! Inflation and producer pay.
//!
//! Continuous inflation is minted lazily on claims:
//!
//!   new_tokens = rate × supply × elapsed / SECONDS_PER_YEAR
//!
//! The network share is split between the per-block, per-vote and
//! per-witness buckets; the rest goes to the infrastructure accounts. A
//! claiming producer takes its fraction of each bucket.

use stakex_core::constants::{
    BPAY_ACCOUNT, COMMUNITY_ACCOUNT, FOUNDING_ACCOUNT, MARKETING_ACCOUNT, SECONDS_PER_YEAR, SYSTEM_ACCOUNT,
    VPAY_ACCOUNT, WPAY_ACCOUNT,
};
use stakex_core::{AccountName, StakexError};
use stakex_econ::PayShare;
use tracing::{debug, info};

use crate::engine::ApplyContext;

/// Fraction of `amount`, truncated toward zero.
fn portion(amount: i64, fraction: f64) -> i64 {
    (amount as f64 * fraction) as i64
}

impl ApplyContext<'_> {
    pub(crate) fn on_block(&mut self, producer: AccountName) -> Result<(), StakexError> {
        if self.global.total_activated_stake < self.params.min_activated_stake {
            return Ok(());
        }
        if self.global.last_pervote_bucket_fill == 0 {
            self.global.last_pervote_bucket_fill = self.now;
        }

        if let Some(mut info) = self.state.producer(producer)? {
            info.unpaid_blocks += 1;
            self.global.total_unpaid_blocks += 1;
            self.state.put_producer(&info)?;
        }

        if self.now - self.global.last_producer_schedule_update > self.params.schedule_update_interval_secs {
            self.update_elected_producers()?;
            if self.now - self.global.last_name_close > self.params.name_close_interval_secs {
                self.close_name_auction()?;
            }
        }
        Ok(())
    }

    /// Propose the top active producers, sorted by name, as the next schedule.
    fn update_elected_producers(&mut self) -> Result<(), StakexError> {
        self.global.last_producer_schedule_update = self.now;

        let mut elected: Vec<AccountName> = self
            .state
            .producers_by_votes(self.params.elected_producer_count)?
            .into_iter()
            .take_while(|p| p.is_active && p.total_votes > 0.0)
            .map(|p| p.owner)
            .collect();
        if elected.is_empty() || elected.len() < self.global.last_producer_schedule_size as usize {
            return Ok(());
        }
        elected.sort();

        if elected != self.global.proposed_schedule {
            info!(size = elected.len(), "new producer schedule proposed");
        }
        self.global.last_producer_schedule_size = elected.len() as u16;
        self.global.proposed_schedule = elected;
        Ok(())
    }

    fn mint_inflation(&mut self) -> Result<(), StakexError> {
        let elapsed = self.now - self.global.last_pervote_bucket_fill;
        if elapsed <= 0 || self.global.last_pervote_bucket_fill == 0 {
            return Ok(());
        }
        let supply = self
            .token
            .supply(self.core_symbol())?
            .ok_or_else(|| StakexError::missing("core token supply"))?;

        let new_tokens =
            (self.params.continuous_rate * supply.amount as f64 * elapsed as f64 / SECONDS_PER_YEAR as f64) as i64;
        let split = &self.params.inflation;
        let to_network = portion(new_tokens, split.network);
        let to_infra = new_tokens - to_network;

        let to_blocks = portion(to_network, split.per_block);
        let to_witnesses = portion(to_network, split.per_witness);
        let to_votes = to_network - to_blocks - to_witnesses;

        let to_community = portion(to_infra, split.community);
        let to_marketing = portion(to_infra, split.marketing);
        let to_founding = to_infra - to_community - to_marketing;

        if new_tokens > 0 {
            self.issue(SYSTEM_ACCOUNT, self.core(new_tokens), "issue tokens for producer pay");
            self.transfer(SYSTEM_ACCOUNT, BPAY_ACCOUNT, self.core(to_blocks), "fund per-block bucket");
            self.transfer(SYSTEM_ACCOUNT, VPAY_ACCOUNT, self.core(to_votes), "fund per-vote bucket");
            self.transfer(SYSTEM_ACCOUNT, WPAY_ACCOUNT, self.core(to_witnesses), "fund per-witness bucket");
            self.transfer(SYSTEM_ACCOUNT, COMMUNITY_ACCOUNT, self.core(to_community), "fund community");
            self.transfer(SYSTEM_ACCOUNT, MARKETING_ACCOUNT, self.core(to_marketing), "fund marketing");
            self.transfer(SYSTEM_ACCOUNT, FOUNDING_ACCOUNT, self.core(to_founding), "fund founding");
        }

        self.global.perblock_bucket += to_blocks;
        self.global.pervote_bucket += to_votes;
        self.global.perwitness_bucket += to_witnesses;
        self.global.last_pervote_bucket_fill = self.now;
        debug!(new_tokens, elapsed, "inflation minted");
        Ok(())
    }

    pub(crate) fn claim_rewards(&mut self, owner: AccountName) -> Result<(), StakexError> {
        let mut producer = self.state.producer(owner)?.ok_or(StakexError::ProducerNotRegistered(owner))?;
        if !producer.is_active {
            return Err(StakexError::ProducerNotActive(owner));
        }
        self.require_activated()?;
        if self.now - producer.last_claim_time <= self.params.min_claim_interval_secs {
            return Err(StakexError::ClaimTooSoon);
        }

        self.mint_inflation()?;

        let per_block_pay = if self.global.total_unpaid_blocks > 0 {
            (self.global.perblock_bucket as i128 * producer.unpaid_blocks as i128
                / self.global.total_unpaid_blocks as i128) as i64
        } else {
            0
        };

        // Vote pay. A producer without a share row starts one now and is
        // paid nothing from this claim.
        let threshold = producer.last_claim_time + self.params.vote_pay_threshold_secs;
        let crossed = threshold <= self.now;
        let (mut vote_share, updated_after) = match self.state.vote_pay_share(owner)? {
            Some(share) => {
                let updated_after = threshold <= share.last_update;
                (share, updated_after)
            }
            None => (PayShare::new(self.now), true),
        };
        let rate = if updated_after { 0.0 } else { producer.total_votes };
        let claimed_votes = vote_share.update(self.now, rate, true);
        self.state.put_vote_pay_share(owner, &vote_share)?;

        let total_votes = self.global.vote_pay.update(self.now, 0.0, 0.0);
        let mut per_vote_pay = 0;
        if total_votes > 0.0 && !crossed {
            per_vote_pay = ((claimed_votes * self.global.pervote_bucket as f64) / total_votes) as i64;
            per_vote_pay = per_vote_pay.min(self.global.pervote_bucket).max(0);
        }
        let rate_back = if updated_after { producer.total_votes } else { 0.0 };
        self.global.vote_pay.update(self.now, -claimed_votes, rate_back);

        // Witness pay
        let in_witness_set = self.witness_set()?.contains(&owner);
        let mut witness_share = self
            .state
            .witness_pay_share(owner)?
            .unwrap_or_else(|| PayShare::new(self.now));
        let claimed_witness = witness_share.update(self.now, if in_witness_set { 1.0 } else { 0.0 }, true);
        self.state.put_witness_pay_share(owner, &witness_share)?;

        let total_witness = self.global.witness_pay.update(self.now, 0.0, 0.0);
        let mut per_witness_pay = 0;
        if total_witness > 0.0 {
            per_witness_pay = ((claimed_witness * self.global.perwitness_bucket as f64) / total_witness) as i64;
            per_witness_pay = per_witness_pay.min(self.global.perwitness_bucket).max(0);
        }
        self.global.witness_pay.update(self.now, -claimed_witness, 0.0);

        self.global.perblock_bucket -= per_block_pay;
        self.global.pervote_bucket -= per_vote_pay;
        self.global.perwitness_bucket -= per_witness_pay;
        self.global.total_unpaid_blocks -= producer.unpaid_blocks;

        producer.last_claim_time = self.now;
        producer.unpaid_blocks = 0;
        self.state.put_producer(&producer)?;

        self.transfer(BPAY_ACCOUNT, owner, self.core(per_block_pay), "producer block pay");
        self.transfer(VPAY_ACCOUNT, owner, self.core(per_vote_pay), "producer vote pay");
        self.transfer(WPAY_ACCOUNT, owner, self.core(per_witness_pay), "producer witness pay");

        info!(%owner, per_block_pay, per_vote_pay, per_witness_pay, "rewards claimed");
        Ok(())
    }
}
