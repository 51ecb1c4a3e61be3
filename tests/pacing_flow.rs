// tests/pacing_flow.rs
//
// 投放节奏核心的端到端场景：Planner 元数据 -> LineItemManager ->
// 竞价消耗 -> DeliveryProgress 记账 -> 跨实例合并 -> 周期清理。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use once_cell::sync::Lazy;

use rust_adx_pacing::{
    DeliveryProgress, DeliverySchedule, LineItemManager, LineItemMetaData, LineItemProvider,
    TokenSpec, TxnLog,
};

static INIT_TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 7, 26, 10, 0, 0).unwrap()
}

fn given_schedule(plan_id: &str, start: DateTime<Utc>, seconds: i64, total: i64) -> DeliverySchedule {
    DeliverySchedule {
        plan_id: plan_id.to_string(),
        start_time_stamp: start,
        end_time_stamp: start + Duration::seconds(seconds),
        updated_time_stamp: Some(start),
        tokens: vec![TokenSpec::of(1, total)],
    }
}

fn given_meta_data(line_item_id: &str, schedules: Vec<DeliverySchedule>) -> LineItemMetaData {
    LineItemMetaData {
        line_item_id: line_item_id.to_string(),
        ext_line_item_id: Some(format!("ext{line_item_id}")),
        deal_id: Some("dealId1".to_string()),
        account_id: "1001".to_string(),
        source: "bidder1".to_string(),
        price: None,
        relative_priority: Some(5),
        start_time_stamp: t0() - Duration::hours(1),
        end_time_stamp: t0() + Duration::hours(1),
        updated_time_stamp: Some(t0()),
        status: Some("active".to_string()),
        frequency_caps: Vec::new(),
        delivery_schedules: schedules,
        targeting: None,
    }
}

#[test]
fn spend_should_pace_delivery_across_schedule_window() {
    Lazy::force(&INIT_TRACING);
    let manager = LineItemManager::new();
    manager.update_line_items(
        &[given_meta_data(
            "lineItemId1",
            vec![given_schedule("planId1", t0(), 1000, 100)],
        )],
        true,
        t0(),
    );
    let line_item = manager.get_line_item_by_id("lineItemId1").unwrap();

    // 新计划立即可投
    assert_eq!(line_item.ready_at(), Some(t0()));

    for _ in 0..25 {
        assert_eq!(line_item.spend_token(t0() + Duration::seconds(50), 0), Some(1));
    }

    // 25/100 消耗在 1000 秒窗口下 -> 名义上要到 start + 250 秒才轮到下一个
    let plan = line_item.active_delivery_plan().unwrap();
    assert_eq!(plan.spent_tokens(), 25);
    assert_eq!(line_item.ready_at(), Some(t0() + Duration::seconds(250)));

    for _ in 0..75 {
        line_item.spend_token(t0() + Duration::seconds(100), 0);
    }

    // 耗尽：不再可消耗，也没有可等待的时间点
    assert_eq!(plan.unspent_tokens(), 0);
    assert_eq!(line_item.spend_token(t0() + Duration::seconds(100), 0), None);
    assert_eq!(line_item.ready_at(), None);
}

#[test]
fn unresponsive_planner_rollover_should_carry_unspent_quota() {
    Lazy::force(&INIT_TRACING);
    let manager = LineItemManager::new();
    manager.update_line_items(
        &[given_meta_data(
            "lineItemId1",
            vec![
                given_schedule("planId1", t0(), 60, 100),
                given_schedule("planId2", t0() + Duration::seconds(60), 60, 40),
            ],
        )],
        true,
        t0(),
    );
    let line_item = manager.get_line_item_by_id("lineItemId1").unwrap();
    for _ in 0..30 {
        line_item.spend_token(t0(), 0);
    }

    // Planner 失联时滚动到下一排期：剩余配额并入新周期
    manager.update_is_planner_responsive(false);
    manager.advance_to_next_plan(t0() + Duration::seconds(61));

    let plan = line_item.active_delivery_plan().unwrap();
    assert_eq!(plan.plan_id(), "planId2");
    assert_eq!(plan.total_tokens(), 140);
    assert_eq!(plan.spent_tokens(), 30);
    assert_eq!(plan.unspent_tokens(), 110);
}

#[test]
fn responsive_planner_rollover_should_start_fresh() {
    Lazy::force(&INIT_TRACING);
    let manager = LineItemManager::new();
    manager.update_line_items(
        &[given_meta_data(
            "lineItemId1",
            vec![
                given_schedule("planId1", t0(), 60, 100),
                given_schedule("planId2", t0() + Duration::seconds(60), 60, 40),
            ],
        )],
        true,
        t0(),
    );
    let line_item = manager.get_line_item_by_id("lineItemId1").unwrap();
    for _ in 0..30 {
        line_item.spend_token(t0(), 0);
    }

    manager.advance_to_next_plan(t0() + Duration::seconds(61));

    // Planner 正常时上一周期的欠账一笔勾销
    let plan = line_item.active_delivery_plan().unwrap();
    assert_eq!(plan.plan_id(), "planId2");
    assert_eq!(plan.total_tokens(), 40);
    assert_eq!(plan.spent_tokens(), 0);
}

#[test]
fn line_item_should_go_dormant_between_schedules() {
    Lazy::force(&INIT_TRACING);
    let manager = LineItemManager::new();
    manager.update_line_items(
        &[given_meta_data(
            "lineItemId1",
            vec![given_schedule("planId1", t0(), 60, 100)],
        )],
        true,
        t0(),
    );
    let line_item = manager.get_line_item_by_id("lineItemId1").unwrap();

    manager.advance_to_next_plan(t0() + Duration::seconds(120));

    assert!(line_item.active_delivery_plan().is_none());
    assert_eq!(line_item.spend_token(t0() + Duration::seconds(120), 0), None);
}

#[test]
fn report_cycle_should_aggregate_merge_and_reset() {
    Lazy::force(&INIT_TRACING);
    let manager = Arc::new(LineItemManager::new());
    manager.update_line_items(
        &[given_meta_data(
            "lineItemId1",
            vec![given_schedule("planId1", t0(), 1000, 100)],
        )],
        true,
        t0(),
    );

    // 两个服务进程各自记账
    let first = DeliveryProgress::of(t0(), Arc::clone(&manager) as Arc<dyn LineItemProvider>);
    let second = DeliveryProgress::of(t0(), Arc::clone(&manager) as Arc<dyn LineItemProvider>);

    let plan_id_to_priority = HashMap::from([("planId1".to_string(), 1)]);
    let mut txn_log = TxnLog::create();
    txn_log
        .line_items_matched_whole_targeting
        .insert("lineItemId1".to_string());
    txn_log
        .sent_to_bidder("bidder1")
        .insert("lineItemId1".to_string());
    txn_log
        .line_item_sent_to_client_as_top_match
        .insert("lineItemId1".to_string());

    for _ in 0..2 {
        first.record_transaction_log(&txn_log, &plan_id_to_priority, "1001");
    }
    for _ in 0..3 {
        second.record_transaction_log(&txn_log, &plan_id_to_priority, "1001");
    }
    second.record_win_event("lineItemId1");

    first.merge_from(&second);

    assert_eq!(first.requests(), 5);
    assert_eq!(first.requests_for_account("1001"), 5);
    let status = first
        .line_item_statuses()
        .get("lineItemId1")
        .unwrap()
        .clone();
    assert_eq!(status.target_matched(), 5);
    assert_eq!(status.sent_to_bidder(), 5);
    assert_eq!(status.sent_to_client_as_top_match(), 5);
    assert_eq!(status.event_count("win"), 1);
    assert_eq!(status.account_id(), Some("1001"));

    // 同 plan_id 且排期不更新：合并保留接收方自己的快照
    let snapshot = status.delivery_plans().get("planId1").unwrap().clone();
    assert_eq!(snapshot.spent_tokens(), 2);

    // 上报用深拷贝共享快照但持有独立计数器
    let report = first.copy_with_original_plans();
    first.record_transaction_log(&txn_log, &plan_id_to_priority, "1001");
    assert_eq!(report.requests(), 5);
    assert_eq!(first.requests(), 6);

    // 周期清理：仓库还认识该 Line Item，状态保留
    first.clean_line_item_statuses(t0() + Duration::hours(2), 1, 5);
    assert!(first.line_item_statuses().contains_key("lineItemId1"));
}
