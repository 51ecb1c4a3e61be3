// src/pacing/token.rs

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::model::schedule::TokenSpec;

/// 投放 Token：某个优先级等级的配额桶。
/// `priority_class` 与 `total` 构造后不可变；`spent` 是可被任意多个竞价线程
/// 并发递增的计数器。排期合并时 Token 本身被替换，但 `spent` 计数器按引用
/// 带入新 Token，历史消耗因此在排期更新后得以保留。
#[derive(Debug, Clone)]
pub struct DeliveryToken {
    priority_class: i32,
    total: i64,
    spent: Arc<AtomicI64>,
}

impl DeliveryToken {
    pub fn of(priority_class: i32, total: i64) -> Self {
        Self {
            priority_class,
            total,
            spent: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn from_spec(spec: &TokenSpec) -> Self {
        Self::of(spec.priority_class, spec.total)
    }

    pub fn priority_class(&self) -> i32 {
        self.priority_class
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    /// 已消耗数量，每次调用重新读取计数器
    pub fn spent_sum(&self) -> i64 {
        self.spent.load(Ordering::Relaxed)
    }

    /// 剩余配额 = total - spent
    pub fn unspent(&self) -> i64 {
        self.total - self.spent_sum()
    }

    /// 消耗一个 Token。不做上限检查，调用方必须先确认 `unspent() > 0`
    pub fn spend(&self) {
        self.spent.fetch_add(1, Ordering::Relaxed);
    }

    /// 用下一周期同等级的 Token 定义生成新 Token：
    /// - `sum_total = false`：直接采用新周期的 total（排期更新）
    /// - `sum_total = true`：两期 total 相加（Planner 不可用时跨周期结转）
    ///
    /// `spent` 计数器实例原样复用。
    pub fn with_next_total(&self, next: &TokenSpec, sum_total: bool) -> DeliveryToken {
        DeliveryToken {
            priority_class: self.priority_class,
            total: if sum_total {
                self.total + next.total
            } else {
                next.total
            },
            spent: Arc::clone(&self.spent),
        }
    }
}
