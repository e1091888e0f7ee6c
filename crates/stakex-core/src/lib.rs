pub mod action;
pub mod constants;
pub mod error;
pub mod params;
pub mod types;

pub use action::{Action, ActionEvent, SignedAction};
pub use error::{ErrorKind, StakexError};
pub use params::{InflationSplit, SystemParams};
pub use types::*;
