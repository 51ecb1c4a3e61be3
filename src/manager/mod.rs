pub mod line_item_manager;

pub use line_item_manager::LineItemManager;
