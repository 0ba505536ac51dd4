//! Simulation harness for linkd session testing.
//!
//! Runs a real [`Session`](linkd_daemon::Session) against a simulated peer
//! over a Unix socket pair, with a virtual clock standing in for wall time.
//! Readiness is still checked with real `poll(2)`, but instead of blocking
//! the clock jumps straight to the next timer, so a 30 second holdoff costs
//! nothing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_env;
pub mod sim_link;
pub mod sim_protocol;

pub use sim_env::SimEnv;
pub use sim_link::{SimPeer, sim_link};
pub use sim_protocol::{CallLog, SimCall, SimProtocol};
