pub mod chat;
pub mod integrations;
pub mod investigations;
pub mod monitoring;
pub mod runbooks;
pub mod webhooks;
