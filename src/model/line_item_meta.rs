// src/model/line_item_meta.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::schedule::DeliverySchedule;

/// Line Item 报价信息
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Price {
    pub cpm: f64,         // 千次展示价格
    pub currency: String, // 币种（如 "USD"）
}

/// 频次控制定义。本核心只透传 fcap id，具体的频控判定由竞价管线负责
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyCap {
    pub fcap_id: String,
    pub count: Option<i64>,
    pub periods: Option<i32>,
    pub period_type: Option<String>, // "hour" / "day" / "week" / "month"
}

/// Planner 下发的 Line Item 元数据（合约、排期、定向等）
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineItemMetaData {
    pub line_item_id: String,
    pub ext_line_item_id: Option<String>,          // 外部系统中的 Line Item ID
    pub deal_id: Option<String>,
    pub account_id: String,
    pub source: String,                            // 投放该 deal 的 bidder
    pub price: Option<Price>,
    pub relative_priority: Option<i32>,            // 同账号内的相对优先级
    pub start_time_stamp: DateTime<Utc>,
    pub end_time_stamp: DateTime<Utc>,
    pub updated_time_stamp: Option<DateTime<Utc>>,
    pub status: Option<String>,                    // "active" 以外的状态不参与投放
    #[serde(default)]
    pub frequency_caps: Vec<FrequencyCap>,
    #[serde(default)]
    pub delivery_schedules: Vec<DeliverySchedule>,
    pub targeting: Option<Value>,                  // 定向表达式，延迟解析，由定向服务消费
}

impl LineItemMetaData {
    /// 全部 fcap id 列表
    pub fn fcap_ids(&self) -> Vec<&str> {
        self.frequency_caps
            .iter()
            .map(|fcap| fcap.fcap_id.as_str())
            .collect()
    }
}
