// src/pacing/status.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::pacing::line_item::LineItem;
use crate::pacing::plan::DeliveryPlan;

/// "win" 事件类型（客户端上报的赢得展示事件）
pub const WIN_EVENT_TYPE: &str = "win";

/// 输给某个竞争对手的次数统计
#[derive(Debug)]
pub struct LostToLineItem {
    line_item_id: String,
    count: AtomicU64,
}

impl LostToLineItem {
    pub fn of(line_item_id: &str) -> Self {
        Self {
            line_item_id: line_item_id.to_string(),
            count: AtomicU64::new(0),
        }
    }

    pub fn line_item_id(&self) -> &str {
        &self.line_item_id
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, count: u64) {
        self.count.fetch_add(count, Ordering::Relaxed);
    }
}

/// 单个 Line Item 在一个统计周期内的计数器集合。纯记账结构，只服务于
/// 上报与跨实例合并，不参与实时的投放决策。
/// 所有计数器都可被任意多个竞价线程并发递增。
#[derive(Debug, Default)]
pub struct LineItemStatus {
    line_item_id: String,
    /// 元数据字段是只写一次的 cell：创建时从仓库解析，解析不到（Line Item
    /// 已被遗忘）则留空，等跨实例合并时从对端补齐
    source: OnceCell<String>,
    deal_id: OnceCell<String>,
    ext_line_item_id: OnceCell<String>,
    account_id: OnceCell<String>,
    /// Line Item 合约结束时间，过期清理依赖它
    line_item_end_time_stamp: OnceCell<DateTime<Utc>>,

    domain_matched: AtomicU64,
    target_matched: AtomicU64,
    target_matched_but_fcapped: AtomicU64,
    target_matched_but_fcap_lookup_failed: AtomicU64,
    pacing_deferred: AtomicU64,
    sent_to_bidder: AtomicU64,
    sent_to_bidder_as_top_match: AtomicU64,
    received_from_bidder: AtomicU64,
    received_from_bidder_invalidated: AtomicU64,
    sent_to_client: AtomicU64,
    sent_to_client_as_top_match: AtomicU64,

    /// 事件类型 -> 次数（如 "win"）
    events: DashMap<String, AtomicU64>,
    /// 仅供上报的计划快照，按 plan_id 索引
    delivery_plans: DashMap<String, Arc<DeliveryPlan>>,
}

impl LineItemStatus {
    /// 仅含 ID 的最小状态（Line Item 已过期或未知时的兜底）
    pub fn of(line_item_id: &str) -> Self {
        Self {
            line_item_id: line_item_id.to_string(),
            ..Default::default()
        }
    }

    /// 从 Line Item 元数据建全量状态
    pub fn from_line_item(line_item: &LineItem) -> Self {
        let meta = line_item.meta_data();
        let status = Self::of(&meta.line_item_id);
        status.source.set(meta.source.clone()).ok();
        if let Some(deal_id) = &meta.deal_id {
            status.deal_id.set(deal_id.clone()).ok();
        }
        if let Some(ext_line_item_id) = &meta.ext_line_item_id {
            status.ext_line_item_id.set(ext_line_item_id.clone()).ok();
        }
        status.account_id.set(meta.account_id.clone()).ok();
        status.line_item_end_time_stamp.set(meta.end_time_stamp).ok();
        status
    }

    pub fn line_item_id(&self) -> &str {
        &self.line_item_id
    }

    pub fn source(&self) -> Option<&str> {
        self.source.get().map(String::as_str)
    }

    pub fn deal_id(&self) -> Option<&str> {
        self.deal_id.get().map(String::as_str)
    }

    pub fn ext_line_item_id(&self) -> Option<&str> {
        self.ext_line_item_id.get().map(String::as_str)
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.get().map(String::as_str)
    }

    pub fn line_item_end_time_stamp(&self) -> Option<DateTime<Utc>> {
        self.line_item_end_time_stamp.get().copied()
    }

    pub fn inc_domain_matched(&self) {
        self.domain_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_target_matched(&self) {
        self.target_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_target_matched_but_fcapped(&self) {
        self.target_matched_but_fcapped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_target_matched_but_fcap_lookup_failed(&self) {
        self.target_matched_but_fcap_lookup_failed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pacing_deferred(&self) {
        self.pacing_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sent_to_bidder(&self) {
        self.sent_to_bidder.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sent_to_bidder_as_top_match(&self) {
        self.sent_to_bidder_as_top_match.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_received_from_bidder(&self) {
        self.received_from_bidder.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_received_from_bidder_invalidated(&self) {
        self.received_from_bidder_invalidated
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sent_to_client(&self) {
        self.sent_to_client.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sent_to_client_as_top_match(&self) {
        self.sent_to_client_as_top_match.fetch_add(1, Ordering::Relaxed);
    }

    /// 按类型递增事件计数，类型不存在则新建
    pub fn inc_event(&self, event_type: &str) {
        self.events
            .entry(event_type.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn domain_matched(&self) -> u64 {
        self.domain_matched.load(Ordering::Relaxed)
    }

    pub fn target_matched(&self) -> u64 {
        self.target_matched.load(Ordering::Relaxed)
    }

    pub fn target_matched_but_fcapped(&self) -> u64 {
        self.target_matched_but_fcapped.load(Ordering::Relaxed)
    }

    pub fn target_matched_but_fcap_lookup_failed(&self) -> u64 {
        self.target_matched_but_fcap_lookup_failed.load(Ordering::Relaxed)
    }

    pub fn pacing_deferred(&self) -> u64 {
        self.pacing_deferred.load(Ordering::Relaxed)
    }

    pub fn sent_to_bidder(&self) -> u64 {
        self.sent_to_bidder.load(Ordering::Relaxed)
    }

    pub fn sent_to_bidder_as_top_match(&self) -> u64 {
        self.sent_to_bidder_as_top_match.load(Ordering::Relaxed)
    }

    pub fn received_from_bidder(&self) -> u64 {
        self.received_from_bidder.load(Ordering::Relaxed)
    }

    pub fn received_from_bidder_invalidated(&self) -> u64 {
        self.received_from_bidder_invalidated.load(Ordering::Relaxed)
    }

    pub fn sent_to_client(&self) -> u64 {
        self.sent_to_client.load(Ordering::Relaxed)
    }

    pub fn sent_to_client_as_top_match(&self) -> u64 {
        self.sent_to_client_as_top_match.load(Ordering::Relaxed)
    }

    pub fn event_count(&self, event_type: &str) -> u64 {
        self.events
            .get(event_type)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn events(&self) -> &DashMap<String, AtomicU64> {
        &self.events
    }

    pub fn delivery_plans(&self) -> &DashMap<String, Arc<DeliveryPlan>> {
        &self.delivery_plans
    }

    /// 合并另一个实例的统计：对端解析到而本方缺失的元数据补齐（仓库
    /// 已遗忘该 Line Item 时靠这一步保住合约结束时间）；逐计数器求和；
    /// 事件按类型并集求和；计划快照按 plan_id 并集，同 id 时更新的排期
    /// 替换旧的
    pub fn merge(&self, other: &LineItemStatus) {
        if let Some(source) = other.source.get() {
            self.source.set(source.clone()).ok();
        }
        if let Some(deal_id) = other.deal_id.get() {
            self.deal_id.set(deal_id.clone()).ok();
        }
        if let Some(ext_line_item_id) = other.ext_line_item_id.get() {
            self.ext_line_item_id.set(ext_line_item_id.clone()).ok();
        }
        if let Some(account_id) = other.account_id.get() {
            self.account_id.set(account_id.clone()).ok();
        }
        if let Some(end) = other.line_item_end_time_stamp.get() {
            self.line_item_end_time_stamp.set(*end).ok();
        }

        self.domain_matched
            .fetch_add(other.domain_matched(), Ordering::Relaxed);
        self.target_matched
            .fetch_add(other.target_matched(), Ordering::Relaxed);
        self.target_matched_but_fcapped
            .fetch_add(other.target_matched_but_fcapped(), Ordering::Relaxed);
        self.target_matched_but_fcap_lookup_failed
            .fetch_add(other.target_matched_but_fcap_lookup_failed(), Ordering::Relaxed);
        self.pacing_deferred
            .fetch_add(other.pacing_deferred(), Ordering::Relaxed);
        self.sent_to_bidder
            .fetch_add(other.sent_to_bidder(), Ordering::Relaxed);
        self.sent_to_bidder_as_top_match
            .fetch_add(other.sent_to_bidder_as_top_match(), Ordering::Relaxed);
        self.received_from_bidder
            .fetch_add(other.received_from_bidder(), Ordering::Relaxed);
        self.received_from_bidder_invalidated
            .fetch_add(other.received_from_bidder_invalidated(), Ordering::Relaxed);
        self.sent_to_client
            .fetch_add(other.sent_to_client(), Ordering::Relaxed);
        self.sent_to_client_as_top_match
            .fetch_add(other.sent_to_client_as_top_match(), Ordering::Relaxed);

        for entry in other.events.iter() {
            self.events
                .entry(entry.key().clone())
                .or_default()
                .fetch_add(entry.value().load(Ordering::Relaxed), Ordering::Relaxed);
        }

        for entry in other.delivery_plans.iter() {
            match self.delivery_plans.entry(entry.key().clone()) {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    if occupied.get().is_schedule_newer(entry.value().schedule()) {
                        occupied.insert(Arc::clone(entry.value()));
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(entry.value()));
                }
            }
        }
    }
}
