//! Domain Module
//!
//! Transport-independent types shared by the bridge and its adapters.
//!
//! - [`models`] - Descriptors, configuration records and bridge events
//! - [`frame`] - Frame encoding rules for the link → bus direction
//! - [`state`] - The coordinator's connection state machine
//! - [`settings`] - Startup settings, file loading and validation

pub mod frame;
pub mod models;
pub mod settings;
pub mod state;
