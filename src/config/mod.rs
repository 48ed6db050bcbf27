mod geo;
mod server;

pub use geo::{GeoConfig, GeoFeatures};
pub use server::ServerConfig;
