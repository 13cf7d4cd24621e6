//! Shared primitives for the capture ledger.
//!
//! Connection setup, schema and migrations, configuration, the JSONL event
//! trail and the id/time helpers every plugin builds on.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod migration;
pub mod schemas;
pub mod store;
pub mod time;
