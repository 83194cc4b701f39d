//! harvestlake - staged data lake (raw -> cleaned -> served) with a
//! price-tracking product catalog.
//!
//! Stores are constructed explicitly and passed to each stage; nothing in
//! the library holds a global client.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod load;
pub mod models;
pub mod pipeline;
pub mod table;
pub mod transform;
pub mod warehouse;
pub mod zones;
