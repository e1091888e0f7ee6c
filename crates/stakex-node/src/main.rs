//! stakex-node: command-line host for the StakeX system engine.
//!
//! A data directory holds three things:
//!   - `state/`       the sled state database
//!   - `ledger.json`  the token ledger the engine settles against
//!   - `params.json`  the `SystemParams` fixed at genesis
//!
//! `init` creates them from a genesis file, `apply` runs a JSON batch of
//! signed actions and prints the events they emit, `query` prints records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use stakex_core::{AccountName, ResourceKind, SignedAction, SystemParams, Timestamp};
use stakex_genesis::{apply_genesis, GenesisParams};
use stakex_state::{MemoryLedger, StateDb, SystemEngine, TokenService};

const STATE_DIR: &str = "state";
const LEDGER_FILE: &str = "ledger.json";
const PARAMS_FILE: &str = "params.json";

#[derive(Parser, Debug)]
#[command(name = "stakex-node", version, about = "StakeX system engine host")]
struct Cli {
    /// Directory holding the state database, ledger and parameters.
    #[arg(long, default_value = "~/.stakex/data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a fresh data directory from a genesis parameters file.
    Init {
        #[arg(long)]
        genesis: PathBuf,
    },
    /// Apply a JSON array of signed actions.
    Apply {
        #[arg(long)]
        actions: PathBuf,
        /// Chain time for the batch: unix seconds or RFC 3339. Defaults to now.
        #[arg(long)]
        now: Option<String>,
        /// Stop at the first rejected action instead of skipping it.
        #[arg(long)]
        stop_on_error: bool,
    },
    /// Print records as JSON.
    Query {
        #[command(subcommand)]
        what: Query,
    },
}

#[derive(Subcommand, Debug)]
enum Query {
    /// Chain clock, activation and schedule summary.
    Status,
    Global,
    Pool,
    RamMarket,
    Producers {
        #[arg(long, default_value_t = 21)]
        limit: usize,
    },
    Voter { name: AccountName },
    Resources { owner: AccountName },
    Fund { owner: AccountName },
    Rex { owner: AccountName },
    Order { owner: AccountName },
    Loans {
        #[arg(long, value_parser = parse_kind, default_value = "cpu")]
        kind: ResourceKind,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Refund { owner: AccountName },
    Bid { name: AccountName },
    Balance { account: AccountName },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stakex=debug")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = expand_tilde(&cli.data_dir);

    match cli.command {
        Command::Init { genesis } => init(&data_dir, &genesis),
        Command::Apply { actions, now, stop_on_error } => {
            let now = match now {
                Some(s) => parse_time(&s)?,
                None => Utc::now().timestamp(),
            };
            apply(&data_dir, &actions, now, stop_on_error)
        }
        Command::Query { what } => query(&data_dir, what),
    }
}

// ── Data directory ────────────────────────────────────────────────────────────

struct Node {
    engine: SystemEngine,
    ledger: MemoryLedger,
    ledger_path: PathBuf,
}

impl Node {
    fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let params_path = data_dir.join(PARAMS_FILE);
        if !params_path.exists() {
            bail!("{} is not initialised; run `stakex-node init` first", data_dir.display());
        }
        let params: SystemParams = read_json(&params_path)?;
        let ledger_path = data_dir.join(LEDGER_FILE);
        let ledger: MemoryLedger = read_json(&ledger_path)?;
        let db = Arc::new(StateDb::open(data_dir.join(STATE_DIR)).context("opening state database")?);
        Ok(Self { engine: SystemEngine::new(db, params), ledger, ledger_path })
    }

    fn save_ledger(&self) -> anyhow::Result<()> {
        write_json(&self.ledger_path, &self.ledger)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

/// Write through a temporary file so a crash never leaves a torn file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn init(data_dir: &Path, genesis_path: &Path) -> anyhow::Result<()> {
    if data_dir.join(PARAMS_FILE).exists() {
        bail!("{} is already initialised", data_dir.display());
    }
    let json = std::fs::read_to_string(genesis_path)
        .with_context(|| format!("reading genesis params from {}", genesis_path.display()))?;
    let genesis = GenesisParams::from_json(&json).context("parsing genesis params JSON")?;

    std::fs::create_dir_all(data_dir).with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(StateDb::open(data_dir.join(STATE_DIR)).context("opening state database")?);
    let engine = SystemEngine::new(Arc::clone(&db), genesis.system.clone());
    let mut ledger = MemoryLedger::default();

    let summary = apply_genesis(&engine, &mut ledger, &genesis).context("applying genesis")?;
    db.flush().context("flushing state database")?;
    write_json(&data_dir.join(LEDGER_FILE), &ledger)?;
    write_json(&data_dir.join(PARAMS_FILE), &genesis.system)?;

    info!(
        data_dir = %data_dir.display(),
        supply = %summary.supply,
        allocated = %summary.allocated,
        accounts = summary.accounts,
        "data directory initialised"
    );
    Ok(())
}

fn apply(data_dir: &Path, actions_path: &Path, now: Timestamp, stop_on_error: bool) -> anyhow::Result<()> {
    let mut node = Node::open(data_dir)?;
    let batch: Vec<SignedAction> = read_json(actions_path)?;
    info!(actions = batch.len(), now = %fmt_time(now), "applying batch");

    let (mut applied, mut rejected) = (0usize, 0usize);
    for signed in &batch {
        match node.engine.apply(signed, &mut node.ledger, now) {
            Ok(events) => {
                node.save_ledger()?;
                applied += 1;
                for event in events {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            Err(e) => {
                rejected += 1;
                warn!(action = signed.action.name(), kind = ?e.kind(), error = %e, "action rejected");
                if stop_on_error {
                    bail!("stopped at rejected action {}: {e}", signed.action.name());
                }
            }
        }
    }

    node.engine.db.flush().context("flushing state database")?;
    info!(applied, rejected, "batch done");
    Ok(())
}

#[derive(Serialize)]
struct Status {
    clock: Option<String>,
    core_symbol: String,
    revision: u8,
    activated_at: Option<String>,
    total_activated_stake: i64,
    total_producer_vote_weight: f64,
    proposed_schedule: Vec<AccountName>,
    ram_reserved: u64,
    max_ram_size: u64,
}

fn query(data_dir: &Path, what: Query) -> anyhow::Result<()> {
    let node = Node::open(data_dir)?;
    let state = node.engine.reader();

    match what {
        Query::Status => {
            let global = state.global()?.context("system is not initialised")?;
            let activated = global.thresh_activated_stake_time;
            print_json(&Status {
                clock: state.clock()?.map(fmt_time),
                core_symbol: global.core_symbol.to_string(),
                revision: global.revision,
                activated_at: (activated > 0).then(|| fmt_time(activated)),
                total_activated_stake: global.total_activated_stake,
                total_producer_vote_weight: global.total_producer_vote_weight,
                proposed_schedule: global.proposed_schedule,
                ram_reserved: global.total_ram_bytes_reserved,
                max_ram_size: global.max_ram_size,
            })
        }
        Query::Global => print_json(&state.global()?),
        Query::Pool => print_json(&state.rex_pool()?),
        Query::RamMarket => print_json(&state.ram_market()?),
        Query::Producers { limit } => print_json(&state.producers_by_votes(limit)?),
        Query::Voter { name } => print_json(&state.voter(name)?),
        Query::Resources { owner } => print_json(&state.user_resources(owner)?),
        Query::Fund { owner } => print_json(&state.rex_fund(owner)?),
        Query::Rex { owner } => print_json(&state.rex_balance(owner)?),
        Query::Order { owner } => print_json(&state.rex_order(owner)?),
        Query::Loans { kind, limit } => print_json(&state.loans_by_expiry(kind, limit)?),
        Query::Refund { owner } => print_json(&state.refund_request(owner)?),
        Query::Bid { name } => print_json(&state.name_bid(name)?),
        Query::Balance { account } => {
            let global = state.global()?.context("system is not initialised")?;
            print_json(&node.ledger.balance(account, global.core_symbol)?)
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_kind(s: &str) -> Result<ResourceKind, String> {
    match s {
        "cpu" => Ok(ResourceKind::Cpu),
        "net" => Ok(ResourceKind::Net),
        other => Err(format!("unknown resource kind `{other}`, expected cpu or net")),
    }
}

/// Unix seconds or an RFC 3339 timestamp.
fn parse_time(s: &str) -> anyhow::Result<Timestamp> {
    if let Ok(secs) = s.parse::<i64>() {
        return Ok(secs);
    }
    let t = DateTime::parse_from_rfc3339(s).with_context(|| format!("invalid time `{s}`"))?;
    Ok(t.timestamp())
}

fn fmt_time(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
