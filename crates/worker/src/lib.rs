pub mod config;
pub mod logging;
pub mod poller;
pub mod remote;
pub mod shutdown;
