// src/config/pacing_config.rs

use serde::{Deserialize, Serialize};

/// 投放节奏核心的配置项
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct PacingConfig {
    /// Line Item 过期后其统计行的保留时长（毫秒）
    pub line_item_status_ttl_ms: i64,
    /// 每个统计行最多缓存的计划快照数量
    pub max_plans_per_delivery_progress: usize,
    /// 消耗 Token 后 ready_at 的整体后移量（毫秒），补偿外部调度延迟
    pub ready_at_adjustment_ms: i64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            line_item_status_ttl_ms: 3_600_000, // 1 小时
            max_plans_per_delivery_progress: 20,
            ready_at_adjustment_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_should_deserialize_with_defaults() {
        let config: PacingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PacingConfig::default());

        let config: PacingConfig =
            serde_json::from_str(r#"{"lineItemStatusTtlMs": 5000, "maxPlansPerDeliveryProgress": 3}"#)
                .unwrap();
        assert_eq!(config.line_item_status_ttl_ms, 5000);
        assert_eq!(config.max_plans_per_delivery_progress, 3);
        assert_eq!(config.ready_at_adjustment_ms, 0);
    }
}
