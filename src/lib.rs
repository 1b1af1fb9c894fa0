mod routes;

pub mod app;
pub mod bounding_box;
pub mod config;
pub mod detection_service;
pub mod detector;
pub mod image_ops;
pub mod labels;
pub mod server;
pub mod store;
pub mod telemetry;

pub use app::start_app;
