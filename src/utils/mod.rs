//! Utility modules shared by the network, mempool and storage layers

pub mod logging;
pub mod retry;
pub mod signal;
pub mod time;

pub use logging::{init_logging, init_logging_from_config};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use retry::RetryConfig;
pub use signal::{
    create_shutdown_receiver, is_shutdown, shutdown_channel, shutdown_requested,
    wait_for_shutdown_signal,
};
pub use time::{current_timestamp, current_timestamp_duration};
