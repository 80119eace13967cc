//! Render layer - stateless drawables derived from session state
//!
//! - `palette` - colours, vehicle/severity colour rules, junction marker styles
//! - `scene` - overview and detail map scenes in virtual canvas pixels
//! - `panel` - live metrics panel model

pub mod palette;
pub mod panel;
pub mod scene;

pub use palette::Rgb;
pub use panel::MetricsPanel;
pub use scene::{detail_scene, overview_scene, Scene, Shape};
