pub mod event_bus;
pub mod feeds;
pub mod http_client;
pub mod kv;
pub mod oracle;
pub mod persistence;
pub mod pubsub;
pub mod push;
