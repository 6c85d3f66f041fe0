//! Farm hub: irrigation control with sensor telemetry and scheduling, plus
//! the finance, crop and equipment records of the same farm.

pub mod clock;
pub mod config;
pub mod crops;
pub mod efficiency;
pub mod equipment;
pub mod error;
pub mod finance;
pub mod irrigation;
pub mod mqtt;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod thresholds;
pub mod valve;
pub mod web;
pub mod zone;
