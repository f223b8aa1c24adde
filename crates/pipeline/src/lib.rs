pub mod file_log;
pub mod inbox;
pub mod plugin;
pub mod processor;
pub mod products;
pub mod reconciler;
pub mod registry;
