//! 复制轮次指标收集模块
//!
//! 记录每个 round 的结果、延迟、重放与超时，并提供内存聚合用于输出摘要。

use std::collections::HashMap;

use contracts::NodeAddress;
use metrics::{counter, gauge, histogram};

/// 记录一个结束的 round
///
/// `outcome` 为 `"ok"` 或错误类别（如 `"timeout"`、`"no_acceptable_response"`）。
pub fn record_round(command: &str, mode: &str, outcome: &str, latency_ms: f64) {
    counter!(
        "gridrep_rounds_total",
        "command" => command.to_string(),
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        "gridrep_round_latency_ms",
        "mode" => mode.to_string()
    )
    .record(latency_ms);
}

/// 记录一次重放
pub fn record_replay(command: &str, ignorers: usize) {
    counter!("gridrep_replays_total", "command" => command.to_string()).increment(1);
    histogram!("gridrep_replay_targets").record(ignorers as f64);
}

/// 记录一次超时及未回复的成员数
pub fn record_timeout(command: &str, missing: usize) {
    counter!("gridrep_timeouts_total", "command" => command.to_string()).increment(1);
    gauge!("gridrep_last_timeout_missing").set(missing as f64);
}

/// 记录后台队列满导致的丢弃
pub fn record_async_dropped(command: &str) {
    counter!(
        "gridrep_async_dropped_total",
        "command" => command.to_string()
    )
    .increment(1);
}

/// Round 指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct RoundStatsAggregator {
    /// 总轮次
    pub total_rounds: u64,

    /// 各结果的轮次数
    pub outcomes: HashMap<String, u64>,

    /// 延迟统计 (毫秒)
    pub latency_stats: RunningStats,

    /// 每轮返回的条目数
    pub entry_stats: RunningStats,

    /// 各成员超时次数
    pub missing_counts: HashMap<NodeAddress, u64>,
}

impl RoundStatsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, outcome: &str, latency_ms: f64, entries: usize, missing: &[NodeAddress]) {
        self.total_rounds += 1;
        *self.outcomes.entry(outcome.to_string()).or_insert(0) += 1;
        self.latency_stats.push(latency_ms);
        self.entry_stats.push(entries as f64);

        for member in missing {
            *self.missing_counts.entry(member.clone()).or_insert(0) += 1;
        }
    }

    /// 生成摘要报告
    pub fn summary(&self) -> RoundSummary {
        let ok = self.outcomes.get("ok").copied().unwrap_or(0);
        RoundSummary {
            total_rounds: self.total_rounds,
            succeeded: ok,
            success_rate: if self.total_rounds > 0 {
                ok as f64 / self.total_rounds as f64 * 100.0
            } else {
                0.0
            },
            outcomes: self.outcomes.clone(),
            latency_ms: StatsSummary::from(&self.latency_stats),
            entries: StatsSummary::from(&self.entry_stats),
            missing_counts: self.missing_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct RoundSummary {
    pub total_rounds: u64,
    pub succeeded: u64,
    pub success_rate: f64,
    pub outcomes: HashMap<String, u64>,
    pub latency_ms: StatsSummary,
    pub entries: StatsSummary,
    pub missing_counts: HashMap<NodeAddress, u64>,
}

impl std::fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Round Metrics Summary ===")?;
        writeln!(f, "Total rounds: {}", self.total_rounds)?;
        writeln!(
            f,
            "Succeeded: {} ({:.2}%)",
            self.succeeded, self.success_rate
        )?;
        writeln!(f, "Latency (ms): {}", self.latency_ms)?;
        writeln!(f, "Entries per round: {}", self.entries)?;

        let mut outcomes: Vec<_> = self.outcomes.iter().collect();
        outcomes.sort();
        if outcomes.len() > 1 || self.succeeded == 0 {
            writeln!(f, "Outcomes:")?;
            for (outcome, count) in outcomes {
                writeln!(f, "  {}: {}", outcome, count)?;
            }
        }

        if !self.missing_counts.is_empty() {
            let mut missing: Vec<_> = self.missing_counts.iter().collect();
            missing.sort();
            writeln!(f, "Missing member counts:")?;
            for (member, count) in missing {
                writeln!(f, "  {}: {}", member, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
