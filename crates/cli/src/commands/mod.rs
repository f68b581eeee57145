pub mod config;
pub mod executors;
pub mod validate;
