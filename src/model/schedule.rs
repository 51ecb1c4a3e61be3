// src/model/schedule.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 计划服务（Planner）下发的 Token 定义：某个优先级等级在本周期内的投放配额
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpec {
    #[serde(rename = "class")]
    pub priority_class: i32, // 优先级等级（数字越小优先级越高）
    pub total: i64,          // 本周期总配额
}

impl TokenSpec {
    pub fn of(priority_class: i32, total: i64) -> Self {
        Self {
            priority_class,
            total,
        }
    }
}

/// 投放排期（Delivery Schedule），由 Planner 针对每个 Line Item 周期性下发
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySchedule {
    pub plan_id: String,                            // 计划 ID
    pub start_time_stamp: DateTime<Utc>,            // 周期开始时间（含）
    pub end_time_stamp: DateTime<Utc>,              // 周期结束时间（不含）
    pub updated_time_stamp: Option<DateTime<Utc>>,  // Planner 最后更新时间
    pub tokens: Vec<TokenSpec>,                     // 每个优先级等级对应一个 Token
}

impl DeliverySchedule {
    /// 判断给定时间是否落在本排期的 [start, end) 窗口内
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start_time_stamp <= now && now < self.end_time_stamp
    }
}
