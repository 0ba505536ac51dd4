//! Scenario-based testing with mandatory oracles.
//!
//! A scenario describes a session configuration, the protocols it runs and
//! what the simulated peer does at each loop iteration. Running it drives
//! a real session through its attempts under virtual time, then hands the
//! recorded [`World`] to an oracle.
//!
//! ```text
//! Scenario::new("name")
//!     .config(..)             session options
//!     .network_control(..)    extra protocols
//!     .peer_frame(i, frame)   peer input before iteration i
//!     .peer_hangup(i)
//!     .raise(i, signal)
//!     .oracle(..)             required before run()
//!     .run()
//! ```

pub mod builder;
pub mod oracle;
pub mod world;

pub use builder::{RunnableScenario, Scenario};
pub use world::World;

/// Verification run against the final world state.
pub type OracleFn = Box<dyn Fn(&World) -> Result<(), String>>;
