// src/lib.rs
//
// OpenRTB ADX 服务的投放节奏（pacing）核心：
// 对每条合约（Line Item）跟踪其投放排期的配额消耗与剩余量，
// 并把投放均匀摊到合约周期内，而不是一上来就打光。

pub mod config;
pub mod manager;
pub mod model;
pub mod pacing;

pub use config::PacingConfig;
pub use manager::LineItemManager;
pub use model::line_item_meta::{FrequencyCap, LineItemMetaData, Price};
pub use model::schedule::{DeliverySchedule, TokenSpec};
pub use model::txn_log::TxnLog;
pub use pacing::line_item::{LineItem, LineItemProvider};
pub use pacing::plan::DeliveryPlan;
pub use pacing::progress::DeliveryProgress;
pub use pacing::status::{LineItemStatus, LostToLineItem, WIN_EVENT_TYPE};
pub use pacing::token::DeliveryToken;
