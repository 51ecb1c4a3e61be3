pub mod line_item_meta;
pub mod schedule;
pub mod txn_log;
