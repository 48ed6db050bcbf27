mod admin;
pub mod dto;
mod geo;
pub mod response;
mod router;

pub use admin::admin_router;
pub use geo::geo_router;
pub use router::{AppState, create_router};
