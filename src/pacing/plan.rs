// src/pacing/plan.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::model::schedule::DeliverySchedule;
use crate::pacing::token::DeliveryToken;

/// 投放计划（Delivery Plan）：一个排期周期内按优先级等级组织的 Token 集合。
/// 计划本身不可变，排期更新/跨周期滚动时整体替换为新实例；
/// Token 内部的 `spent` 计数器是唯一的可变部分。
///
/// Token 按 `priority_class` 升序存放，保证「第一个有剩余配额的 Token」
/// 就是全局优先级最高的等级。
#[derive(Debug, Clone)]
pub struct DeliveryPlan {
    schedule: DeliverySchedule,
    tokens: BTreeMap<i32, DeliveryToken>,
}

impl DeliveryPlan {
    /// 从排期创建全新（零消耗）的计划
    pub fn of(schedule: DeliverySchedule) -> Self {
        let tokens = schedule
            .tokens
            .iter()
            .map(|spec| (spec.priority_class, DeliveryToken::from_spec(spec)))
            .collect();
        Self { schedule, tokens }
    }

    pub fn plan_id(&self) -> &str {
        &self.schedule.plan_id
    }

    pub fn schedule(&self) -> &DeliverySchedule {
        &self.schedule
    }

    pub fn start_time_stamp(&self) -> DateTime<Utc> {
        self.schedule.start_time_stamp
    }

    pub fn end_time_stamp(&self) -> DateTime<Utc> {
        self.schedule.end_time_stamp
    }

    pub fn updated_time_stamp(&self) -> Option<DateTime<Utc>> {
        self.schedule.updated_time_stamp
    }

    /// 按优先级升序遍历 Token
    pub fn tokens(&self) -> impl Iterator<Item = &DeliveryToken> {
        self.tokens.values()
    }

    pub fn unspent_tokens(&self) -> i64 {
        self.tokens.values().map(DeliveryToken::unspent).sum()
    }

    pub fn spent_tokens(&self) -> i64 {
        self.tokens.values().map(DeliveryToken::spent_sum).sum()
    }

    pub fn total_tokens(&self) -> i64 {
        self.tokens.values().map(DeliveryToken::total).sum()
    }

    /// 剩余配额中优先级最高（数值最小）的等级。
    /// 调用方必须先确认 `unspent_tokens() > 0`，否则属于调用契约错误。
    pub fn highest_priority_unspent_class(&self) -> Result<i32, String> {
        self.tokens
            .values()
            .find(|token| token.unspent() > 0)
            .map(DeliveryToken::priority_class)
            .ok_or_else(|| {
                format!(
                    "No unspent tokens left in delivery plan {}",
                    self.schedule.plan_id
                )
            })
    }

    /// 消耗一个最高优先级的 Token，返回其等级；没有剩余配额时返回 None
    pub fn spend_highest_priority(&self) -> Option<i32> {
        let token = self.tokens.values().find(|token| token.unspent() > 0)?;
        token.spend();
        Some(token.priority_class())
    }

    /// 消耗指定等级的一个 Token（用于上报快照计数）。等级不存在时返回 false
    pub fn spend_with_priority(&self, priority_class: i32) -> bool {
        match self.tokens.get(&priority_class) {
            Some(token) => {
                token.spend();
                true
            }
            None => false,
        }
    }

    /// 与下一排期合并，返回绑定到 `next` 的新计划：
    /// - 两边都有的等级：Token 按 `with_next_total` 合并，`spent` 计数器带入新计划
    /// - 仅下一排期有的等级：创建零消耗的新 Token
    /// - 仅当前计划有的等级：丢弃
    pub fn merge_with_next_schedule(
        &self,
        next: &DeliverySchedule,
        sum_total: bool,
    ) -> DeliveryPlan {
        let mut merged: BTreeMap<i32, DeliveryToken> = BTreeMap::new();
        let mut remaining: Vec<_> = next.tokens.iter().collect();

        for token in self.tokens.values() {
            if let Some(pos) = remaining
                .iter()
                .position(|spec| spec.priority_class == token.priority_class())
            {
                let spec = remaining.remove(pos);
                merged.insert(
                    token.priority_class(),
                    token.with_next_total(spec, sum_total),
                );
            }
        }
        for spec in remaining {
            merged.insert(spec.priority_class, DeliveryToken::from_spec(spec));
        }

        DeliveryPlan {
            schedule: next.clone(),
            tokens: merged,
        }
    }

    /// 零消耗副本。用于缓存仅供上报的计划快照，避免把线上消耗带进报表
    pub fn without_spent_tokens(&self) -> DeliveryPlan {
        DeliveryPlan::of(self.schedule.clone())
    }

    /// 平均投放速率（毫秒/Token）。计划已耗尽时无意义，返回 None
    pub fn delivery_rate(&self) -> Option<f64> {
        if self.unspent_tokens() <= 0 {
            return None;
        }
        let window_ms = (self.schedule.end_time_stamp - self.schedule.start_time_stamp)
            .num_milliseconds();
        Some(window_ms as f64 / self.total_tokens() as f64)
    }

    /// 按匀速消耗假设做线性插值：已消耗的量在合约速率下「应当」在什么时间点
    /// 被消耗完。该时间即下一个 Token 名义上可用的时间。
    /// 计划耗尽（无可等待内容）时返回 None。
    pub fn calculate_ready_at(&self) -> Option<DateTime<Utc>> {
        let rate = self.delivery_rate()?;
        let elapsed_ms = (self.spent_tokens() as f64 * rate) as i64;
        Some(self.schedule.start_time_stamp + Duration::milliseconds(elapsed_ms))
    }

    /// 判断 `other` 排期是否比当前计划更新。
    /// 两边 `updated_time_stamp` 都缺失 → false；仅一边缺失 → 缺失的一边视为更旧
    pub fn is_schedule_newer(&self, other: &DeliverySchedule) -> bool {
        match (self.schedule.updated_time_stamp, other.updated_time_stamp) {
            (None, None) => false,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some(own), Some(their)) => own < their,
        }
    }
}
