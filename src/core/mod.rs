pub mod agent;
pub mod credentials;
pub mod error;
pub mod investigation;
pub mod monitor;
pub mod notify;
pub mod relay;
pub mod runbook;
pub mod store;
pub mod vault;
