pub mod admission;
pub mod ai;
pub mod api;
pub mod config;
pub mod extract;
pub mod ledger;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod sweeper;
pub mod vector;
pub mod worker;
