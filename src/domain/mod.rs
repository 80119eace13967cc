//! Domain models - remote entities and map projection
//!
//! - `types` - cities, intersections, vehicles, metrics and wire payloads
//! - `projection` - lat/lon to canvas projection shared by both maps

pub mod projection;
pub mod types;

pub use projection::{Canvas, GeoPoint, Projection, ScreenPoint};
