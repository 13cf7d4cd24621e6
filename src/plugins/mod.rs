//! Pipeline components, one module each.

pub mod backup;
pub mod dedup;
pub mod export;
pub mod health;
pub mod ledger;
pub mod normalize;
pub mod pipeline;
pub mod recovery;
pub mod retention;
pub mod state;
pub mod transcribe;
pub mod watcher;
