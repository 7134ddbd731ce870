//! Common structs for credit-scoring requests, features and audit records
//! shared across crates.

mod api;
mod audit;
mod cell;
mod model;
mod record;

pub use api::*;
pub use audit::*;
pub use cell::*;
pub use model::*;
pub use record::*;
