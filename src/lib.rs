//! aquagate - factory-floor MQTT gateway for water-treatment units.
//!
//! Reads sensor values for every configured unit ("equipo") of a site, publishes
//! them as JSON to `{root}/{store}/{device}/data`, and reports each unit as
//! online/offline on `{root}/{store}/{device}/status`.

pub mod config;
pub mod gateway;
pub mod logging;
pub mod mqtt;
pub mod netinfo;
pub mod telemetry;

pub use config::Config;
pub use gateway::{Gateway, Phase, RunSummary};
