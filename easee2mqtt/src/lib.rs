// externally visible interfaces
pub mod bridge;
pub mod charger_client;
pub mod command_router;
pub mod credential_store;
pub mod models;
pub mod mqtt_config;
pub mod mqtt_wrapper;
pub mod state_publisher;
pub mod topics;
