pub mod audit;
pub mod breaker;
pub mod cancel;
pub mod candidates;
pub mod comment;
pub mod config;
pub mod dispatch;
pub mod ledger;
pub mod monitor;
pub mod pacing;
pub mod paths;
pub mod progress;
pub mod util;
