pub mod app;
pub mod batcher;
pub mod client;
pub mod config;
pub mod crypto;
pub mod delivery;
pub mod host;
pub mod jobs;
pub mod listener;
pub mod logging;
pub mod messages;
pub mod presence;
pub mod relay_transport;
pub mod roster;
pub mod telegram;
pub mod trigger;
pub mod trusted_time;
