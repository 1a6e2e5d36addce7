//! Field station tracker: consolidates mesh-radio events into station state
//! and derives excursion history relative to a campus perimeter.

pub mod broadcast;
pub mod compactor;
pub mod config;
pub mod database;
pub mod errors;
pub mod features;
pub mod geofence;
pub mod locks;
pub mod models;
pub mod mqtt;
pub mod path;
pub mod reducer;
pub mod trips;
