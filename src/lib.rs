#![allow(clippy::module_name_repetitions, clippy::cast_sign_loss)]
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]
#![deny(unused_must_use)]

//! A supervisory daemon that watches a declarative rule file, and when a
//! configured price threshold crosses, submits a trailing-stop order on
//! Kraken on the user's behalf. See [`engine`] for the per-tick evaluation
//! loop and [`supervisor`] for the process lifecycle around it.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod notifications;
pub mod persistence;
pub mod price_provider;
pub mod profit;
pub mod rule;
pub mod supervisor;
pub mod validator;
