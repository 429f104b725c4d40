pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod holder;
pub mod memory;
pub mod models;
pub mod sample;
pub mod store;
pub mod sync;
