use std::{fmt, thread, time::Duration};

/// 原生读写“暂未就绪”时的等待策略。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 原生原语是非阻塞的，逻辑读却要求阻塞语义；在两次轮询之间必须让出线程，
///   否则调用线程会空转占满 CPU。等待策略独立成 trait，便于测试统计等待次数。
///
/// ## 契约 (What)
/// - `attempt` 从 0 开始，表示本次逻辑调用中连续第几次“未就绪”；
/// - 实现必须至少让出一次调度，不得立即返回而不让出。
pub trait ReadinessWait: Send + Sync + fmt::Debug {
    fn wait(&self, attempt: u32);
}

/// 默认协作式等待：先让出若干次，再线性退避睡眠。
///
/// # 教案式注释
///
/// ## 逻辑 (How)
/// - `attempt < threshold`：调用 [`thread::yield_now`]，让其他可运行任务先行；
/// - 之后按 `unit * (attempt - threshold + 1)` 线性增长睡眠，封顶于 `max`。
///
/// ## 注意事项 (Trade-offs)
/// - 默认阈值 3、单位 5ms、上限 100ms 沿用写路径背压统计的节奏；
///   线性退避意味着长时间空闲的连接最多延迟 `max` 才感知新数据。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CooperativeYield {
    threshold: u32,
    unit: Duration,
    max: Duration,
}

impl CooperativeYield {
    pub const DEFAULT_THRESHOLD: u32 = 3;
    pub const DEFAULT_UNIT: Duration = Duration::from_millis(5);
    pub const DEFAULT_MAX: Duration = Duration::from_millis(100);

    pub fn new(threshold: u32, unit: Duration, max: Duration) -> Self {
        Self {
            threshold,
            unit,
            max: max.max(unit),
        }
    }

    /// 第 `attempt` 次等待的睡眠时长；仍处于让出阶段时返回 `None`。
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt < self.threshold {
            return None;
        }
        let factor = attempt - self.threshold + 1;
        Some(self.unit.saturating_mul(factor).min(self.max))
    }
}

impl Default for CooperativeYield {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD, Self::DEFAULT_UNIT, Self::DEFAULT_MAX)
    }
}

impl ReadinessWait for CooperativeYield {
    fn wait(&self, attempt: u32) {
        match self.backoff(attempt) {
            None => thread::yield_now(),
            Some(pause) => thread::sleep(pause),
        }
    }
}
