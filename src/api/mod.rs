pub mod routes;

pub use routes::{get_metrics, get_regions, get_sources, health_check, post_forecast};
