// src/pacing/line_item.rs

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use crate::model::line_item_meta::LineItemMetaData;
use crate::pacing::plan::DeliveryPlan;

/// Line Item 查询接口。DeliveryProgress 通过它把统计行懒加载为带元数据的
/// 完整状态；返回 None 表示 Line Item 已过期或未知。
pub trait LineItemProvider: Send + Sync {
    fn get_line_item_by_id(&self, line_item_id: &str) -> Option<Arc<LineItem>>;
}

/// 当前生效的计划与 ready_at 预测，作为一个整体原子发布。
/// 读方永远看到互相一致的 (plan, ready_at) 组合，不会读到「半更新」状态。
#[derive(Debug)]
struct ActiveState {
    plan: Arc<DeliveryPlan>,
    ready_at: Option<DateTime<Utc>>,
}

/// 一条合约（Line Item）的实时投放状态：元数据 + 当前生效的投放计划。
///
/// 三个状态：
/// - 无生效排期：state = None
/// - 生效且有配额：state = Some，ready_at 为插值预测或刚切换时的 now
/// - 生效但已耗尽：state = Some，ready_at = None
#[derive(Debug)]
pub struct LineItem {
    meta_data: LineItemMetaData,
    state: ArcSwapOption<ActiveState>,
}

impl LineItem {
    /// 创建并立刻推进到包含 `now` 的排期
    pub fn of(meta_data: LineItemMetaData, now: DateTime<Utc>) -> Self {
        let line_item = Self {
            meta_data,
            state: ArcSwapOption::const_empty(),
        };
        line_item.advance_to_next_plan(now, true);
        line_item
    }

    /// 用新元数据重建 Line Item，带上当前的 (plan, ready_at) 状态，
    /// 然后按新排期列表推进。Planner 刷新元数据时使用
    pub fn with_updated_metadata(
        &self,
        meta_data: LineItemMetaData,
        now: DateTime<Utc>,
        is_planner_responsive: bool,
    ) -> LineItem {
        let line_item = LineItem {
            meta_data,
            state: ArcSwapOption::new(self.state.load_full()),
        };
        line_item.advance_to_next_plan(now, is_planner_responsive);
        line_item
    }

    pub fn line_item_id(&self) -> &str {
        &self.meta_data.line_item_id
    }

    pub fn meta_data(&self) -> &LineItemMetaData {
        &self.meta_data
    }

    pub fn account_id(&self) -> &str {
        &self.meta_data.account_id
    }

    pub fn source(&self) -> &str {
        &self.meta_data.source
    }

    pub fn deal_id(&self) -> Option<&str> {
        self.meta_data.deal_id.as_deref()
    }

    pub fn end_time_stamp(&self) -> DateTime<Utc> {
        self.meta_data.end_time_stamp
    }

    pub fn relative_priority(&self) -> Option<i32> {
        self.meta_data.relative_priority
    }

    /// 合约时间窗内即视为活跃（与是否有生效排期无关）
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.meta_data.start_time_stamp <= now && now < self.meta_data.end_time_stamp
    }

    pub fn active_delivery_plan(&self) -> Option<Arc<DeliveryPlan>> {
        self.state.load().as_ref().map(|state| Arc::clone(&state.plan))
    }

    pub fn ready_at(&self) -> Option<DateTime<Utc>> {
        self.state.load().as_ref().and_then(|state| state.ready_at)
    }

    /// 剩余配额中优先级最高的等级；无生效计划或计划耗尽时返回 None
    pub fn highest_unspent_tokens_class(&self) -> Option<i32> {
        let state = self.state.load();
        state
            .as_ref()
            .and_then(|state| state.plan.highest_priority_unspent_class().ok())
    }

    /// 排期切换算法：选出包含 `now` 的排期并发布对应的计划。
    ///
    /// - 没有匹配排期 → 进入「无生效排期」状态
    /// - 排期的 plan_id 与当前计划不同：
    ///   - Planner 正常 → 直接换成新排期的全新计划（旧配额作废，新周期从零开始）
    ///   - Planner 不可用 → 旧计划的 Token 结转进新排期（total 相加），
    ///     避免在故障窗口内丢失配额
    /// - plan_id 相同且排期更新时间更新 → 原地合并（采用新 total，保留历史消耗）
    pub fn advance_to_next_plan(&self, now: DateTime<Utc>, is_planner_responsive: bool) {
        let current = self.state.load_full();
        let schedule = self
            .meta_data
            .delivery_schedules
            .iter()
            .find(|schedule| schedule.contains(now));

        let next = match schedule {
            None => None,
            Some(schedule) => {
                let current_plan = current
                    .as_ref()
                    .filter(|state| state.plan.plan_id() == schedule.plan_id)
                    .map(|state| Arc::clone(&state.plan));

                let (plan, is_new_plan) = match (current_plan, current.as_ref()) {
                    // plan_id 未变：只有排期更新了才合并
                    (Some(plan), _) => {
                        if plan.is_schedule_newer(schedule) {
                            (Arc::new(plan.merge_with_next_schedule(schedule, false)), false)
                        } else {
                            (plan, false)
                        }
                    }
                    // 跨周期滚动且 Planner 不可用：结转旧配额
                    (None, Some(state)) if !is_planner_responsive => {
                        trace!(
                            line_item_id = %self.meta_data.line_item_id,
                            plan_id = %schedule.plan_id,
                            "Planner unresponsive, carrying unspent tokens into next plan"
                        );
                        (
                            Arc::new(state.plan.merge_with_next_schedule(schedule, true)),
                            true,
                        )
                    }
                    // 首次进入排期，或正常滚动到新周期
                    (None, _) => (Arc::new(DeliveryPlan::of(schedule.clone())), true),
                };

                let ready_at = if plan.unspent_tokens() <= 0 {
                    None
                } else if is_new_plan {
                    // 刚切进新计划时没有可插值的历史，立即可投
                    Some(now)
                } else {
                    plan.calculate_ready_at()
                };

                Some(Arc::new(ActiveState { plan, ready_at }))
            }
        };

        self.state.store(next);
    }

    /// 消耗一个最高优先级 Token 并刷新 ready_at 预测。
    /// `adjustment_millis` 把预测整体后移，用于补偿外部调度的已知延迟。
    /// 返回被消耗的等级；无生效计划或计划耗尽时返回 None
    pub fn spend_token(&self, now: DateTime<Utc>, adjustment_millis: i64) -> Option<i32> {
        let state = self.state.load_full()?;
        let spent_class = state.plan.spend_highest_priority();

        if let Some(class) = spent_class {
            self.state.rcu(|current| {
                current.as_ref().map(|state| {
                    let ready_at = state
                        .plan
                        .calculate_ready_at()
                        .map(|at| at + Duration::milliseconds(adjustment_millis));
                    Arc::new(ActiveState {
                        plan: Arc::clone(&state.plan),
                        ready_at,
                    })
                })
            });
            trace!(
                line_item_id = %self.meta_data.line_item_id,
                priority_class = class,
                at = %now,
                "Spent delivery token"
            );
        }

        spent_class
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schedule::{DeliverySchedule, TokenSpec};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 7, 26, 10, 0, 0).unwrap()
    }

    fn given_schedule(
        plan_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tokens: Vec<TokenSpec>,
    ) -> DeliverySchedule {
        DeliverySchedule {
            plan_id: plan_id.to_string(),
            start_time_stamp: start,
            end_time_stamp: end,
            updated_time_stamp: Some(start),
            tokens,
        }
    }

    fn given_meta_data(schedules: Vec<DeliverySchedule>) -> LineItemMetaData {
        LineItemMetaData {
            line_item_id: "lineItemId1".to_string(),
            ext_line_item_id: None,
            deal_id: Some("dealId1".to_string()),
            account_id: "1001".to_string(),
            source: "bidder1".to_string(),
            price: None,
            relative_priority: Some(5),
            start_time_stamp: t0() - Duration::days(1),
            end_time_stamp: t0() + Duration::days(1),
            updated_time_stamp: Some(t0()),
            status: Some("active".to_string()),
            frequency_caps: Vec::new(),
            delivery_schedules: schedules,
            targeting: None,
        }
    }

    #[test]
    fn line_item_should_stay_dormant_without_matching_schedule() {
        let schedule = given_schedule(
            "planId1",
            t0() + Duration::hours(1),
            t0() + Duration::hours(2),
            vec![TokenSpec::of(1, 100)],
        );
        let line_item = LineItem::of(given_meta_data(vec![schedule]), t0());

        assert!(line_item.active_delivery_plan().is_none());
        assert_eq!(line_item.ready_at(), None);
        assert_eq!(line_item.spend_token(t0(), 0), None);
    }

    #[test]
    fn first_transition_should_make_line_item_immediately_eligible() {
        let schedule = given_schedule(
            "planId1",
            t0() - Duration::minutes(1),
            t0() + Duration::minutes(1),
            vec![TokenSpec::of(1, 100)],
        );
        let line_item = LineItem::of(given_meta_data(vec![schedule]), t0());

        assert_eq!(line_item.ready_at(), Some(t0()));
        assert_eq!(line_item.highest_unspent_tokens_class(), Some(1));
    }

    #[test]
    fn rollover_with_responsive_planner_should_discard_unspent_tokens() {
        let first = given_schedule(
            "planId1",
            t0() - Duration::minutes(2),
            t0() - Duration::minutes(1),
            vec![TokenSpec::of(1, 100)],
        );
        let second = given_schedule(
            "planId2",
            t0() - Duration::minutes(1),
            t0() + Duration::minutes(1),
            vec![TokenSpec::of(1, 40)],
        );
        let line_item = LineItem::of(
            given_meta_data(vec![first, second]),
            t0() - Duration::minutes(2),
        );
        line_item.spend_token(t0() - Duration::minutes(2), 0);

        line_item.advance_to_next_plan(t0(), true);

        let plan = line_item.active_delivery_plan().unwrap();
        assert_eq!(plan.plan_id(), "planId2");
        // 新周期从零开始，旧的未消耗配额不结转
        assert_eq!(plan.unspent_tokens(), 40);
        assert_eq!(plan.spent_tokens(), 0);
    }

    #[test]
    fn rollover_with_unresponsive_planner_should_carry_tokens_forward() {
        let first = given_schedule(
            "planId1",
            t0() - Duration::minutes(2),
            t0() - Duration::minutes(1),
            vec![TokenSpec::of(1, 100)],
        );
        let second = given_schedule(
            "planId2",
            t0() - Duration::minutes(1),
            t0() + Duration::minutes(1),
            vec![TokenSpec::of(1, 40)],
        );
        let line_item = LineItem::of(
            given_meta_data(vec![first, second]),
            t0() - Duration::minutes(2),
        );
        line_item.spend_token(t0() - Duration::minutes(2), 0);

        line_item.advance_to_next_plan(t0(), false);

        let plan = line_item.active_delivery_plan().unwrap();
        assert_eq!(plan.plan_id(), "planId2");
        // 两期 total 相加，历史消耗保留
        assert_eq!(plan.total_tokens(), 140);
        assert_eq!(plan.spent_tokens(), 1);
        assert_eq!(plan.unspent_tokens(), 139);
    }

    #[test]
    fn same_plan_with_newer_schedule_should_merge_in_place() {
        let schedule = given_schedule(
            "planId1",
            t0() - Duration::minutes(1),
            t0() + Duration::minutes(1),
            vec![TokenSpec::of(1, 100)],
        );
        let mut updated = schedule.clone();
        updated.updated_time_stamp = Some(t0());
        updated.tokens = vec![TokenSpec::of(1, 60)];

        let mut meta_data = given_meta_data(vec![schedule]);
        let line_item = LineItem::of(meta_data.clone(), t0());
        line_item.spend_token(t0(), 0);

        meta_data.delivery_schedules = vec![updated];
        let refreshed = line_item.with_updated_metadata(meta_data, t0(), true);

        let plan = refreshed.active_delivery_plan().unwrap();
        assert_eq!(plan.total_tokens(), 60);
        assert_eq!(plan.spent_tokens(), 1);
    }

    #[test]
    fn same_plan_with_stale_schedule_should_keep_current_plan() {
        let schedule = given_schedule(
            "planId1",
            t0() - Duration::minutes(1),
            t0() + Duration::minutes(1),
            vec![TokenSpec::of(1, 100)],
        );
        let line_item = LineItem::of(given_meta_data(vec![schedule]), t0());
        let before = line_item.active_delivery_plan().unwrap();

        line_item.advance_to_next_plan(t0(), true);

        let after = line_item.active_delivery_plan().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn exhausted_plan_should_publish_absent_ready_at() {
        let schedule = given_schedule(
            "planId1",
            t0() - Duration::minutes(1),
            t0() + Duration::minutes(1),
            vec![TokenSpec::of(1, 1)],
        );
        let line_item = LineItem::of(given_meta_data(vec![schedule]), t0());

        assert_eq!(line_item.spend_token(t0(), 0), Some(1));
        assert_eq!(line_item.ready_at(), None);
        assert!(line_item.active_delivery_plan().is_some());
    }

    #[test]
    fn spend_token_should_shift_ready_at_by_adjustment() {
        let schedule = given_schedule(
            "planId1",
            t0(),
            t0() + Duration::seconds(1000),
            vec![TokenSpec::of(1, 100)],
        );
        let line_item = LineItem::of(given_meta_data(vec![schedule]), t0());

        line_item.spend_token(t0(), 500);

        // 1/100 的 1000 秒窗口 → start + 10 秒，再加 500ms 补偿
        let expected = t0() + Duration::seconds(10) + Duration::milliseconds(500);
        assert_eq!(line_item.ready_at(), Some(expected));
    }
}
