use std::collections::{BTreeMap, BTreeSet};

use stakex_core::constants::MAX_URL_LENGTH;
use stakex_core::{AccountName, ProducerKey, StakexError};
use stakex_econ::PayShare;
use tracing::{debug, info};

use crate::engine::ApplyContext;
use crate::records::{ProducerInfo, VoterInfo};

/// Changes to the vote-pay stream accumulated while shifting votes.
#[derive(Debug, Default)]
struct VotePayDelta {
    rate: f64,
    inactive_share: f64,
}

impl ApplyContext<'_> {
    fn vote_weight(&self, voter: &VoterInfo) -> f64 {
        let own = voter.staked.min(self.params.max_vote_power) as f64;
        if voter.is_proxy {
            own + voter.proxied_vote_weight
        } else {
            own
        }
    }

    /// Add `delta` votes to `name` and account the producer's vote-pay rate.
    ///
    /// A producer that has not claimed within the pay threshold stops
    /// accruing: its share is frozen on the first touch after the
    /// threshold and its rate leaves the global stream.
    fn shift_producer_votes(&mut self, name: AccountName, delta: f64, acc: &mut VotePayDelta) -> Result<(), StakexError> {
        let mut producer = self.state.producer(name)?.ok_or(StakexError::ProducerNotRegistered(name))?;
        let init_total_votes = producer.total_votes;
        producer.total_votes += delta;
        if producer.total_votes < 0.0 {
            producer.total_votes = 0.0;
        }
        self.global.total_producer_vote_weight += delta;
        self.state.put_producer(&producer)?;

        if let Some(mut share) = self.state.vote_pay_share(name)? {
            let threshold = producer.last_claim_time + self.params.vote_pay_threshold_secs;
            let crossed = threshold <= self.now;
            let updated_after = threshold <= share.last_update;
            let rate = if updated_after { 0.0 } else { init_total_votes };
            let accrued = share.update(self.now, rate, crossed && !updated_after);
            self.state.put_vote_pay_share(name, &share)?;

            if !crossed {
                acc.rate += delta;
            } else if !updated_after {
                acc.inactive_share += accrued;
                acc.rate -= init_total_votes;
            }
        }
        Ok(())
    }

    fn apply_vote_pay_delta(&mut self, acc: VotePayDelta) {
        self.global.vote_pay.update(self.now, -acc.inactive_share, acc.rate);
    }

    // ── Witness set ──────────────────────────────────────────────────────────

    /// Top producers by votes that are active and hold a meaningful share
    /// of all votes.
    pub(crate) fn witness_set(&self) -> Result<BTreeSet<AccountName>, StakexError> {
        let total = self.global.total_producer_vote_weight;
        if total <= 0.0 {
            return Ok(BTreeSet::new());
        }
        Ok(self
            .state
            .producers_by_votes(self.params.witness_set_size)?
            .into_iter()
            .filter(|p| p.is_active && p.total_votes / total > self.params.witness_min_vote_fraction)
            .map(|p| p.owner)
            .collect())
    }

    /// Settle witness pay shares of producers entering or leaving the set.
    pub(crate) fn apply_witness_changes(
        &mut self,
        before: &BTreeSet<AccountName>,
        after: &BTreeSet<AccountName>,
    ) -> Result<(), StakexError> {
        let mut rate_delta = 0.0;
        let mut changed = false;
        for name in before.difference(after) {
            let mut share = self.state.witness_pay_share(*name)?.unwrap_or_else(|| PayShare::new(self.now));
            share.update(self.now, 1.0, false);
            self.state.put_witness_pay_share(*name, &share)?;
            rate_delta -= 1.0;
            changed = true;
            debug!(producer = %name, "left witness set");
        }
        for name in after.difference(before) {
            let mut share = self.state.witness_pay_share(*name)?.unwrap_or_else(|| PayShare::new(self.now));
            share.update(self.now, 0.0, false);
            self.state.put_witness_pay_share(*name, &share)?;
            rate_delta += 1.0;
            changed = true;
            debug!(producer = %name, "joined witness set");
        }
        if changed {
            self.global.witness_pay.update(self.now, 0.0, rate_delta);
        }
        Ok(())
    }

    // ── Producers ────────────────────────────────────────────────────────────

    pub(crate) fn register_producer(
        &mut self,
        name: AccountName,
        key: ProducerKey,
        url: &str,
        location: u16,
    ) -> Result<(), StakexError> {
        if url.len() >= MAX_URL_LENGTH {
            return Err(StakexError::UrlTooLong { max: MAX_URL_LENGTH });
        }
        if key.is_empty() {
            return Err(StakexError::EmptyProducerKey);
        }
        let staked = self.state.voter(name)?.map(|v| v.staked).unwrap_or(0);
        if staked <= self.params.min_producer_stake {
            return Err(StakexError::ProducerStakeTooLow { min: self.params.min_producer_stake });
        }

        let before = self.witness_set()?;
        match self.state.producer(name)? {
            Some(mut producer) => {
                producer.producer_key = key;
                producer.is_active = true;
                producer.url = url.to_string();
                producer.location = location;
                if producer.last_claim_time == 0 {
                    producer.last_claim_time = self.now;
                }
                self.state.put_producer(&producer)?;

                if self.state.vote_pay_share(name)?.is_none() {
                    self.state.put_vote_pay_share(name, &PayShare::new(self.now))?;
                    self.global.vote_pay.update(self.now, 0.0, producer.total_votes);
                }
                if self.state.witness_pay_share(name)?.is_none() {
                    self.state.put_witness_pay_share(name, &PayShare::new(self.now))?;
                }
                info!(producer = %name, "producer re-registered");
            }
            None => {
                let producer = ProducerInfo {
                    owner: name,
                    total_votes: 0.0,
                    producer_key: key,
                    is_active: true,
                    url: url.to_string(),
                    unpaid_blocks: 0,
                    last_claim_time: self.now,
                    location,
                };
                self.state.put_producer(&producer)?;
                self.state.put_vote_pay_share(name, &PayShare::new(self.now))?;
                self.state.put_witness_pay_share(name, &PayShare::new(self.now))?;
                info!(producer = %name, "producer registered");
            }
        }
        let after = self.witness_set()?;
        self.apply_witness_changes(&before, &after)
    }

    /// Deactivate a producer; its votes stay but it leaves the schedule
    /// candidates and the witness set.
    pub(crate) fn unregister_producer(&mut self, name: AccountName) -> Result<(), StakexError> {
        let mut producer = self.state.producer(name)?.ok_or(StakexError::ProducerNotRegistered(name))?;
        let before = self.witness_set()?;
        producer.deactivate();
        self.state.put_producer(&producer)?;
        let after = self.witness_set()?;
        self.apply_witness_changes(&before, &after)?;
        info!(producer = %name, "producer deactivated");
        Ok(())
    }

    // ── Voters ───────────────────────────────────────────────────────────────

    /// Add `delta` to the voter's stake and re-tally its vote.
    pub(crate) fn update_voting_power(&mut self, owner: AccountName, delta: i64) -> Result<(), StakexError> {
        let mut voter = self.state.voter(owner)?.unwrap_or_else(|| VoterInfo::new(owner));
        voter.staked += delta;
        if voter.staked < 0 {
            return Err(StakexError::InsufficientStake("stake for voting cannot be negative"));
        }
        self.state.put_voter(&voter)?;

        if voter.proxy.is_some() || !voter.producers.is_empty() {
            self.update_votes(owner, voter.proxy, &voter.producers, false)?;
        }
        Ok(())
    }

    pub(crate) fn vote_producer(
        &mut self,
        voter: AccountName,
        proxy: Option<AccountName>,
        producers: &[AccountName],
    ) -> Result<(), StakexError> {
        if self.state.producer(voter)?.is_some() {
            return Err(StakexError::ProducersCannotVote);
        }
        self.update_rex_stake(voter)?;
        self.update_votes(voter, proxy, producers, true)?;

        if self.state.rex_balance(voter)?.is_some_and(|b| b.rex_balance.amount > 0) {
            self.check_voting_requirement(voter)?;
        }

        let mut info = self.state.voter(voter)?.ok_or(StakexError::VoterNotFound(voter))?;
        let weight = info.staked.min(self.params.max_vote_power);
        info.unpaid_votes += weight;
        self.global.total_unpaid_votes += weight;
        self.state.put_voter(&info)
    }

    pub(crate) fn update_votes(
        &mut self,
        voter_name: AccountName,
        proxy: Option<AccountName>,
        producers: &[AccountName],
        voting: bool,
    ) -> Result<(), StakexError> {
        if let Some(proxy) = proxy {
            if !producers.is_empty() {
                return Err(StakexError::ProxyAndProducers);
            }
            if proxy == voter_name {
                return Err(StakexError::ProxyToSelf);
            }
        } else {
            if producers.len() > self.params.max_producer_votes {
                return Err(StakexError::TooManyProducers {
                    max: self.params.max_producer_votes,
                    got: producers.len(),
                });
            }
            if !producers.windows(2).all(|w| w[0] < w[1]) {
                return Err(StakexError::ProducersNotSorted);
            }
        }

        let mut voter = self.state.voter(voter_name)?.ok_or(StakexError::VoterNotFound(voter_name))?;
        if proxy.is_some() && voter.is_proxy {
            return Err(StakexError::ProxyCannotUseProxy);
        }

        // The first vote of an account activates its stake.
        if voter.last_vote_weight <= 0.0 {
            self.global.total_activated_stake += voter.staked;
            if self.global.total_activated_stake >= self.params.min_activated_stake
                && self.global.thresh_activated_stake_time == 0
            {
                self.global.thresh_activated_stake_time = self.now;
                info!(total = self.global.total_activated_stake, "chain activated");
            }
        }

        let before = self.witness_set()?;
        let new_weight = self.vote_weight(&voter);

        // (delta, in the new vote set)
        let mut deltas: BTreeMap<AccountName, (f64, bool)> = BTreeMap::new();
        if voter.last_vote_weight > 0.0 {
            if let Some(old_proxy) = voter.proxy {
                let mut old = self.state.voter(old_proxy)?.ok_or_else(|| StakexError::missing("old proxy"))?;
                old.proxied_vote_weight -= voter.last_vote_weight;
                self.state.put_voter(&old)?;
                self.propagate_weight_change(old_proxy)?;
            } else {
                for p in &voter.producers {
                    deltas.entry(*p).or_insert((0.0, false)).0 -= voter.last_vote_weight;
                }
            }
        }

        if let Some(new_proxy) = proxy {
            let mut target = self.state.voter(new_proxy)?.ok_or(StakexError::NotAProxy(new_proxy))?;
            if voting && !target.is_proxy {
                return Err(StakexError::NotAProxy(new_proxy));
            }
            if new_weight >= 0.0 {
                target.proxied_vote_weight += new_weight;
                self.state.put_voter(&target)?;
                self.propagate_weight_change(new_proxy)?;
            }
        } else if new_weight >= 0.0 {
            for p in producers {
                let entry = deltas.entry(*p).or_insert((0.0, false));
                entry.0 += new_weight;
                entry.1 = true;
            }
        }

        let mut acc = VotePayDelta::default();
        for (name, (delta, is_new)) in deltas {
            match self.state.producer(name)? {
                Some(producer) => {
                    if voting && !producer.is_active && is_new {
                        return Err(StakexError::ProducerNotActive(name));
                    }
                    self.shift_producer_votes(name, delta, &mut acc)?;
                }
                None if is_new => return Err(StakexError::ProducerNotRegistered(name)),
                None => {}
            }
        }
        self.apply_vote_pay_delta(acc);

        voter.last_vote_weight = new_weight;
        voter.producers = producers.to_vec();
        voter.proxy = proxy;
        self.state.put_voter(&voter)?;

        let after = self.witness_set()?;
        self.apply_witness_changes(&before, &after)?;
        debug!(voter = %voter_name, weight = new_weight, "votes updated");
        Ok(())
    }

    /// Push a proxy's changed weight to whatever it votes for.
    fn propagate_weight_change(&mut self, name: AccountName) -> Result<(), StakexError> {
        let voter = self.state.voter(name)?.ok_or(StakexError::VoterNotFound(name))?;
        if voter.proxy.is_some() && voter.is_proxy {
            return Err(StakexError::ProxyCannotUseProxy);
        }
        let new_weight = self.vote_weight(&voter);
        let delta = new_weight - voter.last_vote_weight;
        if delta.abs() <= self.params.vote_weight_epsilon {
            return Ok(());
        }

        if let Some(proxy) = voter.proxy {
            let mut target = self.state.voter(proxy)?.ok_or_else(|| StakexError::missing("proxy"))?;
            target.proxied_vote_weight += delta;
            self.state.put_voter(&target)?;
            self.propagate_weight_change(proxy)?;
        } else {
            let mut acc = VotePayDelta::default();
            for p in &voter.producers {
                self.shift_producer_votes(*p, delta, &mut acc)?;
            }
            self.apply_vote_pay_delta(acc);
        }

        let mut voter = self.state.voter(name)?.ok_or(StakexError::VoterNotFound(name))?;
        voter.last_vote_weight = new_weight;
        self.state.put_voter(&voter)
    }

    pub(crate) fn register_proxy(&mut self, proxy: AccountName, is_proxy: bool) -> Result<(), StakexError> {
        match self.state.voter(proxy)? {
            Some(mut voter) => {
                if voter.is_proxy == is_proxy {
                    return Err(StakexError::NoEffect);
                }
                if is_proxy && voter.proxy.is_some() {
                    return Err(StakexError::ProxyUsesProxy);
                }
                let before = self.witness_set()?;
                voter.is_proxy = is_proxy;
                self.state.put_voter(&voter)?;
                self.propagate_weight_change(proxy)?;
                let after = self.witness_set()?;
                self.apply_witness_changes(&before, &after)?;
            }
            None => {
                let voter = VoterInfo { is_proxy, ..VoterInfo::new(proxy) };
                self.state.put_voter(&voter)?;
            }
        }
        info!(%proxy, is_proxy, "proxy status changed");
        Ok(())
    }
}
