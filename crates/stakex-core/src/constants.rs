//! ─── StakeX Protocol Constants ──────────────────────────────────────────────
//!
//! Fixed protocol values. Tunable economics live in `SystemParams`.

use crate::types::{AccountName, Symbol};

// ── Amounts ──────────────────────────────────────────────────────────────────

/// Largest magnitude an `Asset` may hold: 2^62 - 1.
pub const MAX_ASSET_AMOUNT: i64 = (1 << 62) - 1;

// ── Time ─────────────────────────────────────────────────────────────────────

pub const SECONDS_PER_DAY: i64 = 24 * 3600;

/// Inflation is annualised over 52 weeks.
pub const SECONDS_PER_YEAR: i64 = 52 * 7 * SECONDS_PER_DAY;

// ── Well-known accounts ──────────────────────────────────────────────────────

pub const SYSTEM_ACCOUNT: AccountName = AccountName::constant("stx");
pub const TOKEN_ACCOUNT: AccountName = AccountName::constant("stx.token");
pub const STAKE_ACCOUNT: AccountName = AccountName::constant("stx.stake");
pub const RAM_ACCOUNT: AccountName = AccountName::constant("stx.ram");
pub const RAMFEE_ACCOUNT: AccountName = AccountName::constant("stx.ramfee");
pub const BPAY_ACCOUNT: AccountName = AccountName::constant("stx.bpay");
pub const WPAY_ACCOUNT: AccountName = AccountName::constant("stx.wpay");
pub const VPAY_ACCOUNT: AccountName = AccountName::constant("stx.vpay");
pub const NAMES_ACCOUNT: AccountName = AccountName::constant("stx.names");
pub const REX_ACCOUNT: AccountName = AccountName::constant("stx.rex");
pub const COMMUNITY_ACCOUNT: AccountName = AccountName::constant("stx.comm");
pub const MARKETING_ACCOUNT: AccountName = AccountName::constant("stx.market");
pub const FOUNDING_ACCOUNT: AccountName = AccountName::constant("stx.found");

// ── Symbols ──────────────────────────────────────────────────────────────────

/// Pool-share token of the RAM bancor market.
pub const RAMCORE_SYMBOL: Symbol = Symbol::constant("RAMCORE", 4);
/// RAM, counted in bytes.
pub const RAM_SYMBOL: Symbol = Symbol::constant("RAM", 0);
/// Pool-share token of the resource exchange.
pub const REX_SYMBOL: Symbol = Symbol::constant("REX", 4);

// ── RAM market ───────────────────────────────────────────────────────────────

/// Initial supply of the RAM market share token.
pub const RAMCORE_INITIAL_SUPPLY: i64 = 100_000_000_000_000;

/// Fraction of the core token supply seeded into the RAM market quote connector.
pub const RAM_QUOTE_SEED_DIVISOR: i64 = 1000;

/// RAM fee is 1/200 (0.5%), rounded up.
pub const RAM_FEE_DIVISOR: i64 = 200;

pub const DEFAULT_MAX_RAM_SIZE: u64 = 64 * 1024 * 1024 * 1024;

/// Upper bound accepted by `setram`.
pub const MAX_RAM_SIZE_LIMIT: u64 = 1024 * 1024 * 1024 * 1024 * 1024;

// ── Producers and voting ─────────────────────────────────────────────────────

pub const MAX_URL_LENGTH: usize = 512;

/// Highest global state revision this build knows how to migrate to.
pub const MAX_SUPPORTED_REVISION: u8 = 1;

// ── Name auctions ────────────────────────────────────────────────────────────

/// A new bid must exceed the current one by more than 1/10.
pub const NAME_BID_INCREMENT_DIVISOR: i64 = 10;
