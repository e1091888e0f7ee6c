//! Persistent system state and the action engine.
//!
//! `StateDb` stores every table in sled; `SystemEngine::apply` runs one
//! action against a staged copy of the state and commits it together with
//! the action's token settlements.

pub mod db;
pub mod engine;
pub mod keys;
pub mod records;
pub mod service;
pub mod staged;

mod names;
mod ram;
mod rewards;
mod rex;
mod staking;
mod voting;

pub use db::StateDb;
pub use engine::SystemEngine;
pub use records::*;
pub use service::{Authorizer, MemoryLedger, Settlement, SignerAuthorizer, TokenService};
pub use staged::StagedState;
