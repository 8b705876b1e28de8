mod model_service;
mod ort_service;
mod prediction;
mod routes;
mod server;
mod state;
mod telemetry;

pub mod config;

pub use server::start_server;
