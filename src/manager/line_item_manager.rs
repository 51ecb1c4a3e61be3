// src/manager/line_item_manager.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::model::line_item_meta::LineItemMetaData;
use crate::pacing::line_item::{LineItem, LineItemProvider};

/// Planner 眼中的 "active" 状态
const ACTIVE: &str = "active";

/// Line Item 管理器：维护 id -> LineItem 的并发注册表，承接 Planner 的
/// 元数据刷新、后台的排期推进与管理端的失效操作。
/// DeliveryProgress 通过 `LineItemProvider` 从这里懒加载元数据。
pub struct LineItemManager {
    id_to_line_items: DashMap<String, Arc<LineItem>>,
    is_planner_responsive: AtomicBool,
}

impl Default for LineItemManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LineItemManager {
    pub fn new() -> Self {
        Self {
            id_to_line_items: DashMap::new(),
            is_planner_responsive: AtomicBool::new(true),
        }
    }

    pub fn update_is_planner_responsive(&self, is_planner_responsive: bool) {
        self.is_planner_responsive
            .store(is_planner_responsive, Ordering::Relaxed);
    }

    pub fn is_planner_responsive(&self) -> bool {
        self.is_planner_responsive.load(Ordering::Relaxed)
    }

    /// 应用一轮 Planner 元数据：开始跟踪新的 Line Item 与排期，
    /// 丢掉过期/停用的。Planner 不可用时整轮跳过（沿用现有数据）
    pub fn update_line_items(
        &self,
        plan_response: &[LineItemMetaData],
        is_planner_responsive: bool,
        now: DateTime<Utc>,
    ) {
        self.is_planner_responsive
            .store(is_planner_responsive, Ordering::Relaxed);
        if !is_planner_responsive {
            return;
        }

        self.remove_inactive_line_items(plan_response, now);

        for meta_data in plan_response {
            let active = meta_data.status.as_deref() == Some(ACTIVE);
            if active && !Self::is_expired(now, meta_data.end_time_stamp) {
                self.update_line_item(meta_data, now);
            }
        }
    }

    /// 推进所有 Line Item 的排期（低频后台路径）
    pub fn advance_to_next_plan(&self, now: DateTime<Utc>) {
        let is_planner_responsive = self.is_planner_responsive();
        for entry in self.id_to_line_items.iter() {
            entry.value().advance_to_next_plan(now, is_planner_responsive);
        }
    }

    pub fn invalidate_line_items_by_ids(&self, line_item_ids: &[String]) {
        self.id_to_line_items
            .retain(|id, _| !line_item_ids.contains(id));
        if !line_item_ids.is_empty() {
            info!("Line Items with ids {} were removed", line_item_ids.join(", "));
        }
    }

    pub fn invalidate_line_items(&self) {
        let line_items_to_remove: Vec<String> = self
            .id_to_line_items
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        self.id_to_line_items.clear();
        if !line_items_to_remove.is_empty() {
            info!(
                "Line Items with ids {} were removed",
                line_items_to_remove.join(", ")
            );
        }
    }

    /// 账号名下是否有至少一个当前活跃的 Line Item
    pub fn account_has_deals(&self, account_id: &str, now: DateTime<Utc>) -> bool {
        !account_id.is_empty()
            && self.id_to_line_items.iter().any(|entry| {
                entry.value().account_id() == account_id && entry.value().is_active(now)
            })
    }

    pub fn get_line_items(&self) -> Vec<Arc<LineItem>> {
        self.id_to_line_items
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn is_expired(now: DateTime<Utc>, end_time_stamp: DateTime<Utc>) -> bool {
        now > end_time_stamp
    }

    fn remove_inactive_line_items(&self, plan_response: &[LineItemMetaData], now: DateTime<Utc>) {
        let mut line_items_to_remove: Vec<String> = plan_response
            .iter()
            .filter(|meta_data| {
                meta_data.status.as_deref() != Some(ACTIVE)
                    || Self::is_expired(now, meta_data.end_time_stamp)
            })
            .map(|meta_data| meta_data.line_item_id.clone())
            .collect();

        for entry in self.id_to_line_items.iter() {
            if Self::is_expired(now, entry.value().end_time_stamp()) {
                line_items_to_remove.push(entry.key().clone());
            }
        }

        if !line_items_to_remove.is_empty() {
            info!(
                "Line Items {} were dropped as expired or inactive",
                line_items_to_remove.join(", ")
            );
            self.id_to_line_items
                .retain(|id, _| !line_items_to_remove.contains(id));
        }
    }

    /// 新 Line Item 直接注册；已存在的用新元数据重建，
    /// 当前的 (plan, ready_at) 状态原样带入
    fn update_line_item(&self, meta_data: &LineItemMetaData, now: DateTime<Utc>) {
        let is_planner_responsive = self.is_planner_responsive();
        match self.id_to_line_items.entry(meta_data.line_item_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let updated = occupied.get().with_updated_metadata(
                    meta_data.clone(),
                    now,
                    is_planner_responsive,
                );
                occupied.insert(Arc::new(updated));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(LineItem::of(meta_data.clone(), now)));
            }
        }
    }
}

impl LineItemProvider for LineItemManager {
    fn get_line_item_by_id(&self, line_item_id: &str) -> Option<Arc<LineItem>> {
        self.id_to_line_items
            .get(line_item_id)
            .map(|entry| Arc::clone(entry.value()))
    }
}
