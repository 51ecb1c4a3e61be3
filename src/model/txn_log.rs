// src/model/txn_log.rs

use std::collections::{HashMap, HashSet};

/// 单次竞价请求的事件日志（Transaction Log）。
/// 由竞价管线在请求处理过程中填写，请求结束后整体交给 DeliveryProgress 记账。
/// 每条记录都是 Line Item ID 的集合；按 bidder 维度拆分的字段为 bidder -> id 集合。
#[derive(Debug, Clone, Default)]
pub struct TxnLog {
    pub line_items_matched_domain_targeting: HashSet<String>,
    pub line_items_matched_whole_targeting: HashSet<String>,
    pub line_items_matched_targeting_fcapped: HashSet<String>,
    pub line_items_matched_targeting_fcap_lookup_failed: HashSet<String>,
    pub line_items_ready_to_serve: HashSet<String>,
    pub line_items_pacing_deferred: HashSet<String>,
    pub line_items_sent_to_bidder: HashMap<String, HashSet<String>>,
    pub line_items_sent_to_bidder_as_top_match: HashMap<String, HashSet<String>>,
    pub line_items_received_from_bidder: HashMap<String, HashSet<String>>,
    pub line_items_response_invalidated: HashSet<String>,
    pub line_items_sent_to_client: HashSet<String>,
    pub line_item_sent_to_client_as_top_match: HashSet<String>,
    /// 定向阶段输给了哪些竞争对手：line item id -> 竞争对手 id 集合
    pub lost_matching_to_line_items: HashMap<String, HashSet<String>>,
    /// 竞价阶段输给了哪些竞争对手
    pub lost_auction_to_line_items: HashMap<String, HashSet<String>>,
}

impl TxnLog {
    pub fn create() -> Self {
        Self::default()
    }

    /// 按 bidder 取出 sent_to_bidder 集合，不存在则创建
    pub fn sent_to_bidder(&mut self, bidder: &str) -> &mut HashSet<String> {
        self.line_items_sent_to_bidder
            .entry(bidder.to_string())
            .or_default()
    }

    pub fn sent_to_bidder_as_top_match(&mut self, bidder: &str) -> &mut HashSet<String> {
        self.line_items_sent_to_bidder_as_top_match
            .entry(bidder.to_string())
            .or_default()
    }

    pub fn received_from_bidder(&mut self, bidder: &str) -> &mut HashSet<String> {
        self.line_items_received_from_bidder
            .entry(bidder.to_string())
            .or_default()
    }
}
