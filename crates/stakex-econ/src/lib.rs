//! Storage-free economics: bancor pricing, lazy pay-share accrual and
//! share maturity buckets. Everything here is a pure function of the
//! records passed in.

pub mod exchange;
pub mod maturity;
pub mod payshare;

pub use exchange::{get_bancor_input, get_bancor_output, Connector, ExchangeState, Side};
pub use maturity::{maturity_date, MaturityBuckets};
pub use payshare::{PayShare, PayShareTotals};
