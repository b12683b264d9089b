pub mod challenge;
pub mod core;
pub mod features;
pub mod harvest;
pub mod scraping;

// --- Primary core exports ---
pub use crate::core::config;
pub use crate::core::error::HarvestError;
pub use crate::core::types;

// --- Component shortcuts ---
pub use crate::challenge::{detector, solver, state_machine};
pub use crate::features::{archive, motion, proxy_pool, rate_limiter};
pub use crate::harvest::HarvestRun;
