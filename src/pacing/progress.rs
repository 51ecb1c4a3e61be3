// src/pacing/progress.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::model::txn_log::TxnLog;
use crate::pacing::line_item::{LineItem, LineItemProvider};
use crate::pacing::status::{LineItemStatus, LostToLineItem, WIN_EVENT_TYPE};

/// 投放进度聚合器：每个服务进程、每个统计周期一个实例。
/// 竞价管线每处理完一次请求就交来一份 TxnLog，本结构把它摊入各个
/// LineItemStatus；周期结束时多个进程的实例可以互相合并成全局视图。
///
/// 记账路径全部为无锁计数器 + 并发 map 的 insert-if-absent，
/// 不同 Line Item 之间互不竞争。
pub struct DeliveryProgress {
    start_time_stamp: RwLock<DateTime<Utc>>,
    end_time_stamp: RwLock<Option<DateTime<Utc>>>,
    line_item_statuses: DashMap<String, Arc<LineItemStatus>>,
    requests_per_account: DashMap<String, AtomicU64>,
    /// line item id -> (竞争对手 id -> 输掉次数)
    line_item_id_to_lost: DashMap<String, DashMap<String, LostToLineItem>>,
    requests: AtomicU64,
    line_item_provider: Arc<dyn LineItemProvider>,
}

impl DeliveryProgress {
    pub fn of(
        start_time_stamp: DateTime<Utc>,
        line_item_provider: Arc<dyn LineItemProvider>,
    ) -> Self {
        Self {
            start_time_stamp: RwLock::new(start_time_stamp),
            end_time_stamp: RwLock::new(None),
            line_item_statuses: DashMap::new(),
            requests_per_account: DashMap::new(),
            line_item_id_to_lost: DashMap::new(),
            requests: AtomicU64::new(0),
            line_item_provider,
        }
    }

    /// 把一次竞价请求的事件日志摊入统计。
    /// `plan_id_to_token_priority`：本次请求中各计划应记账的优先级等级
    pub fn record_transaction_log(
        &self,
        txn_log: &TxnLog,
        plan_id_to_token_priority: &HashMap<String, i32>,
        account_id: &str,
    ) {
        self.account_requests(account_id).fetch_add(1, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);

        for id in &txn_log.line_item_sent_to_client_as_top_match {
            self.increment(id, LineItemStatus::inc_sent_to_client_as_top_match);
        }
        for id in &txn_log.line_items_sent_to_client {
            self.increment(id, LineItemStatus::inc_sent_to_client);
        }
        for id in &txn_log.line_items_matched_domain_targeting {
            self.increment(id, LineItemStatus::inc_domain_matched);
        }
        for id in &txn_log.line_items_matched_whole_targeting {
            self.increment(id, LineItemStatus::inc_target_matched);
        }
        for id in &txn_log.line_items_matched_targeting_fcapped {
            self.increment(id, LineItemStatus::inc_target_matched_but_fcapped);
        }
        for id in &txn_log.line_items_matched_targeting_fcap_lookup_failed {
            self.increment(id, LineItemStatus::inc_target_matched_but_fcap_lookup_failed);
        }
        for id in &txn_log.line_items_pacing_deferred {
            self.increment(id, LineItemStatus::inc_pacing_deferred);
        }
        for ids in txn_log.line_items_sent_to_bidder.values() {
            for id in ids {
                self.increment(id, LineItemStatus::inc_sent_to_bidder);
            }
        }
        for ids in txn_log.line_items_sent_to_bidder_as_top_match.values() {
            for id in ids {
                self.increment(id, LineItemStatus::inc_sent_to_bidder_as_top_match);
            }
        }
        for ids in txn_log.line_items_received_from_bidder.values() {
            for id in ids {
                self.increment(id, LineItemStatus::inc_received_from_bidder);
            }
        }
        for id in &txn_log.line_items_response_invalidated {
            self.increment(id, LineItemStatus::inc_received_from_bidder_invalidated);
        }

        // 最终送达客户端的 top match 额外在上报快照上消耗一个 Token
        for id in &txn_log.line_item_sent_to_client_as_top_match {
            self.inc_token(id, plan_id_to_token_priority);
        }

        for (id, lost_to_ids) in &txn_log.lost_matching_to_line_items {
            self.update_lost_to_each_line_item(id, lost_to_ids.iter());
        }
        for (id, lost_to_ids) in &txn_log.lost_auction_to_line_items {
            self.update_lost_to_each_line_item(id, lost_to_ids.iter());
        }
    }

    /// 记录 win 事件，状态不存在则懒创建
    pub fn record_win_event(&self, line_item_id: &str) {
        self.status_or_create(line_item_id).inc_event(WIN_EVENT_TYPE);
    }

    /// 合并另一个 DeliveryProgress（另一进程的部分视图）。
    /// 调用方需保证每个来源最多被合并一次
    pub fn merge_from(&self, another: &DeliveryProgress) {
        self.requests
            .fetch_add(another.requests.load(Ordering::Relaxed), Ordering::Relaxed);

        for entry in another.requests_per_account.iter() {
            self.account_requests(entry.key())
                .fetch_add(entry.value().load(Ordering::Relaxed), Ordering::Relaxed);
        }

        for entry in another.line_item_statuses.iter() {
            self.status_or_create(entry.key()).merge(entry.value());
        }

        for entry in another.line_item_id_to_lost.iter() {
            let overall = self
                .line_item_id_to_lost
                .entry(entry.key().clone())
                .or_default();
            for lost in entry.value().iter() {
                overall
                    .entry(lost.key().clone())
                    .or_insert_with(|| LostToLineItem::of(lost.key()))
                    .add(lost.value().count());
            }
        }
    }

    /// 确保快照集合里有 Line Item 当前生效计划的副本：
    /// 不存在则插入零消耗副本；已有同 id 但更旧的快照则换成新计划的副本
    pub fn upsert_active_plan_snapshot(&self, line_item: &LineItem) {
        let Some(active_plan) = line_item.active_delivery_plan() else {
            return;
        };
        let status = self.status_or_create(line_item.line_item_id());

        match status.delivery_plans().entry(active_plan.plan_id().to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_schedule_newer(active_plan.schedule()) {
                    occupied.insert(Arc::new(active_plan.without_spent_tokens()));
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(active_plan.without_spent_tokens()));
            }
        };
    }

    /// 同 upsert，但同 id 更旧的快照与新排期做合并而不是替换，
    /// 保留快照上已记的消耗
    pub fn merge_active_plan_snapshot(&self, line_item: &LineItem) {
        let Some(active_plan) = line_item.active_delivery_plan() else {
            return;
        };
        let status = self.status_or_create(line_item.line_item_id());

        match status.delivery_plans().entry(active_plan.plan_id().to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_schedule_newer(active_plan.schedule()) {
                    let merged = occupied
                        .get()
                        .merge_with_next_schedule(active_plan.schedule(), false);
                    occupied.insert(Arc::new(merged));
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(active_plan.without_spent_tokens()));
            }
        };
    }

    /// 清理过期统计：
    /// - 仓库已不认识且合约结束时间早于 `now - ttl` 的状态整行删除
    /// - 保留行中超过 `max_plan_number` 的快照按排期结束时间从旧到新丢弃
    pub fn clean_line_item_statuses(
        &self,
        now: DateTime<Utc>,
        line_item_status_ttl_ms: i64,
        max_plan_number: usize,
    ) {
        let mut removed: Vec<String> = Vec::new();
        self.line_item_statuses.retain(|id, status| {
            let expired = self.is_line_item_status_expired(id, status, now, line_item_status_ttl_ms);
            if expired {
                removed.push(id.clone());
            }
            !expired
        });
        if !removed.is_empty() {
            debug!("Line item statuses {} were dropped as expired", removed.join(", "));
        }

        for entry in self.line_item_statuses.iter() {
            Self::cut_cached_delivery_plans(entry.value(), max_plan_number);
        }
    }

    /// 给每个活跃 Line Item 预建统计行（上报前调用）
    pub fn update_with_active_line_items(&self, line_items: &[Arc<LineItem>]) {
        for line_item in line_items {
            self.status_or_create(line_item.line_item_id());
        }
    }

    /// 深拷贝：计数器归零后重新合并（得到独立的计数器），
    /// 计划快照按 Arc 共享
    pub fn copy_with_original_plans(&self) -> DeliveryProgress {
        let progress = DeliveryProgress::of(
            self.start_time_stamp(),
            Arc::clone(&self.line_item_provider),
        );

        for entry in self.line_item_statuses.iter() {
            let status = progress.create_line_item_status(entry.key());
            for plan in entry.value().delivery_plans().iter() {
                status
                    .delivery_plans()
                    .insert(plan.key().clone(), Arc::clone(plan.value()));
            }
            progress
                .line_item_statuses
                .insert(entry.key().clone(), Arc::new(status));
        }

        progress.merge_from(self);
        progress
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn requests_for_account(&self, account_id: &str) -> u64 {
        self.requests_per_account
            .get(account_id)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn line_item_statuses(&self) -> &DashMap<String, Arc<LineItemStatus>> {
        &self.line_item_statuses
    }

    pub fn lost_count(&self, line_item_id: &str, lost_to_line_item_id: &str) -> u64 {
        self.line_item_id_to_lost
            .get(line_item_id)
            .and_then(|lost| lost.get(lost_to_line_item_id).map(|l| l.count()))
            .unwrap_or(0)
    }

    pub fn start_time_stamp(&self) -> DateTime<Utc> {
        *self.start_time_stamp.read()
    }

    pub fn set_start_time_stamp(&self, start_time_stamp: DateTime<Utc>) {
        *self.start_time_stamp.write() = start_time_stamp;
    }

    pub fn end_time_stamp(&self) -> Option<DateTime<Utc>> {
        *self.end_time_stamp.read()
    }

    pub fn set_end_time_stamp(&self, end_time_stamp: DateTime<Utc>) {
        *self.end_time_stamp.write() = Some(end_time_stamp);
    }

    fn account_requests(
        &self,
        account_id: &str,
    ) -> dashmap::mapref::one::RefMut<'_, String, AtomicU64> {
        self.requests_per_account
            .entry(account_id.to_string())
            .or_default()
    }

    /// 递增某个状态的计数器，状态不存在则懒创建
    fn increment(&self, line_item_id: &str, inc: impl Fn(&LineItemStatus)) {
        inc(&self.status_or_create(line_item_id));
    }

    fn status_or_create(&self, line_item_id: &str) -> Arc<LineItemStatus> {
        self.line_item_statuses
            .entry(line_item_id.to_string())
            .or_insert_with(|| Arc::new(self.create_line_item_status(line_item_id)))
            .clone()
    }

    fn create_line_item_status(&self, line_item_id: &str) -> LineItemStatus {
        match self.line_item_provider.get_line_item_by_id(line_item_id) {
            Some(line_item) => LineItemStatus::from_line_item(&line_item),
            None => LineItemStatus::of(line_item_id),
        }
    }

    /// 在上报快照上消耗一个 Token。快照不存在时先从生效计划建零消耗副本
    fn inc_token(&self, line_item_id: &str, plan_id_to_token_priority: &HashMap<String, i32>) {
        let Some(line_item) = self.line_item_provider.get_line_item_by_id(line_item_id) else {
            return;
        };
        let Some(active_plan) = line_item.active_delivery_plan() else {
            return;
        };
        let status = self.status_or_create(line_item_id);

        let report_plan = status
            .delivery_plans()
            .entry(active_plan.plan_id().to_string())
            .or_insert_with(|| Arc::new(active_plan.without_spent_tokens()))
            .clone();

        if let Some(priority) = plan_id_to_token_priority.get(report_plan.plan_id()) {
            report_plan.spend_with_priority(*priority);
        }
    }

    fn update_lost_to_each_line_item<'a>(
        &self,
        line_item_id: &str,
        lost_to_ids: impl Iterator<Item = &'a String>,
    ) {
        let lost_map = self
            .line_item_id_to_lost
            .entry(line_item_id.to_string())
            .or_default();
        for lost_to_id in lost_to_ids {
            lost_map
                .entry(lost_to_id.clone())
                .or_insert_with(|| LostToLineItem::of(lost_to_id))
                .inc();
        }
    }

    /// 过期判定：仓库里已经没有这个 Line Item，且（如果知道）它的合约
    /// 结束时间早于 now - ttl。从未拿到过元数据的占位状态一旦无主即可清理
    fn is_line_item_status_expired(
        &self,
        line_item_id: &str,
        status: &LineItemStatus,
        now: DateTime<Utc>,
        line_item_status_ttl_ms: i64,
    ) -> bool {
        if self
            .line_item_provider
            .get_line_item_by_id(line_item_id)
            .is_some()
        {
            return false;
        }
        match status.line_item_end_time_stamp() {
            Some(end) => (now - end).num_milliseconds() > line_item_status_ttl_ms,
            None => true,
        }
    }

    /// 把状态里缓存的计划快照裁剪到配置的上限，旧的先丢
    fn cut_cached_delivery_plans(status: &LineItemStatus, max_plan_number: usize) {
        let plans = status.delivery_plans();
        if plans.len() <= max_plan_number {
            return;
        }

        let mut by_end_time: Vec<(String, DateTime<Utc>)> = plans
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().end_time_stamp()))
            .collect();
        by_end_time.sort_by_key(|(_, end)| *end);

        for (plan_id, _) in by_end_time.iter().take(plans.len() - max_plan_number) {
            plans.remove(plan_id);
        }
    }
}
