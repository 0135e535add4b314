//! Bridge Module
//!
//! Wires a [`LinkSession`](crate::infrastructure::bluetooth::LinkSession) to a
//! [`BusSession`](crate::infrastructure::mqtt::BusSession).
//!
//! ```text
//!   peripheral ──notify──► link scheduler ──────────publish──────────► broker
//!   peripheral ◄──write─── link scheduler ◄── handoff ◄── bus loop ◄── broker
//! ```

pub mod coordinator;
pub mod error;
pub mod handoff;
pub mod reporter;
pub mod shutdown;


pub use coordinator::Bridge;
pub use error::BridgeError;
pub use reporter::RelayStats;
pub use shutdown::ShutdownSignal;
