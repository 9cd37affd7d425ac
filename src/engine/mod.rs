// tiermesh engine — tiered memory manager and request router internals.

pub mod backoff;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod health;
pub mod manager;
pub mod power;
pub mod router;
pub mod sweeper;
pub mod tiers;
