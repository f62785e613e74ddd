pub mod broadcast;
pub mod correlator;
pub mod error;
pub mod relay;
pub mod result_relay;
pub mod upload_store;
pub mod worker_channel;
