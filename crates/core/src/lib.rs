pub mod audit;
pub mod changes;
pub mod coercion;
pub mod credentials;
pub mod db;
pub mod error;
pub mod filename;
pub mod metadata;
pub mod row;
pub mod sql;
pub mod types;
