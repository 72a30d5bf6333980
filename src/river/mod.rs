pub mod cache;
pub mod data;
pub mod render;

pub use cache::{RiverCache, RIVER_IDLE_SECS};
pub use data::RiverData;
pub use render::{render_river, river_file_name, wrap_callback, RenderOptions, RiverDocument};
