pub mod line_item;
pub mod plan;
pub mod progress;
pub mod status;
pub mod token;
