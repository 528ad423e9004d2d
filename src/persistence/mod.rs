//! Persistence Layer (spec §4.3): atomic tabular read/write for config,
//! state, log and trade files, plus the editor-coordination handshake.

pub mod atomic;
pub mod config_store;
pub mod coordination;
pub mod log_store;
pub mod state_store;
pub mod trade_store;
