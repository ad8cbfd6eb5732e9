//! ZK circuit definitions.

mod membership;

pub use membership::{MembershipCircuit, NUM_PUBLIC_INPUTS};
