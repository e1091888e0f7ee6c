use serde::{Deserialize, Serialize};

use crate::constants::SECONDS_PER_DAY;

/// How freshly minted inflation is divided. Each level's fractions sum to 1;
/// the last share of each level absorbs truncation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InflationSplit {
    /// Share of new tokens that funds the network buckets. The rest goes to
    /// the infrastructure accounts.
    pub network: f64,
    /// Network share paid per produced block.
    pub per_block: f64,
    /// Network share paid by validator status.
    pub per_witness: f64,
    /// Infrastructure share for the community account.
    pub community: f64,
    /// Infrastructure share for the marketing account.
    pub marketing: f64,
}

impl Default for InflationSplit {
    fn default() -> Self {
        Self {
            network: 0.5,
            per_block: 0.60,
            per_witness: 0.15,
            community: 0.65,
            marketing: 0.10,
        }
    }
}

/// Tunable economics of the system. Loaded from genesis and persisted with
/// the state so every node applies actions under the same parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SystemParams {
    /// Upper bound on the vote weight a single voter's own stake carries.
    pub max_vote_power: i64,
    /// Stake that must be voting before inflation, claims and unstaking open.
    pub min_activated_stake: i64,
    /// A producer must have strictly more than this staked to register.
    pub min_producer_stake: i64,
    /// Continuous annual inflation rate.
    pub continuous_rate: f64,
    pub inflation: InflationSplit,
    /// Raw-unit shares issued per token when the pool is empty.
    pub rex_bootstrap_ratio: i64,
    /// Initial rent connector of the resource exchange.
    pub rex_init_total_rent: i64,
    pub loan_term_secs: i64,
    /// Shares bought today mature at the end of today plus this many days.
    pub rex_maturity_days: i64,
    /// Iterations of opportunistic maintenance run inside pool actions.
    pub rex_opportunistic_max: u16,
    pub min_claim_interval_secs: i64,
    pub refund_delay_secs: i64,
    /// Votes older than this relative to the last claim stop accruing vote pay.
    pub vote_pay_threshold_secs: i64,
    pub max_producer_votes: usize,
    /// Producer count a voter must support (or use a proxy) to hold REX.
    pub min_producers_for_rex: usize,
    pub witness_set_size: usize,
    /// Minimum fraction of total vote weight to be in the validator-status set.
    pub witness_min_vote_fraction: f64,
    pub elected_producer_count: usize,
    pub schedule_update_interval_secs: i64,
    pub name_close_interval_secs: i64,
    /// Name auctions only close this long after the chain activated.
    pub name_close_activation_delay_secs: i64,
    /// Weight changes at or below this are not propagated through proxies.
    pub vote_weight_epsilon: f64,
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            max_vote_power: 1_000_0000,
            min_activated_stake: 150_000_000_0000,
            min_producer_stake: 100_000_0000,
            continuous_rate: 0.04879,
            inflation: InflationSplit::default(),
            rex_bootstrap_ratio: 1,
            rex_init_total_rent: 20_000_0000,
            loan_term_secs: 30 * SECONDS_PER_DAY,
            rex_maturity_days: 4,
            rex_opportunistic_max: 2,
            min_claim_interval_secs: SECONDS_PER_DAY,
            refund_delay_secs: 3 * SECONDS_PER_DAY,
            vote_pay_threshold_secs: 3 * SECONDS_PER_DAY,
            max_producer_votes: 30,
            min_producers_for_rex: 21,
            witness_set_size: 50,
            witness_min_vote_fraction: 0.005,
            elected_producer_count: 21,
            schedule_update_interval_secs: 60,
            name_close_interval_secs: SECONDS_PER_DAY,
            name_close_activation_delay_secs: 14 * SECONDS_PER_DAY,
            vote_weight_epsilon: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let params: SystemParams =
            serde_json::from_str(r#"{ "max_vote_power": 42, "loan_term_secs": 60 }"#).unwrap();
        assert_eq!(params.max_vote_power, 42);
        assert_eq!(params.loan_term_secs, 60);
        assert_eq!(params.witness_set_size, 50);
        assert_eq!(params.inflation, InflationSplit::default());
    }
}
