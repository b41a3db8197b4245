use std::sync::{Mutex, OnceLock};

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

/// 进程内计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsState {
    pub broadcast_ok: u64,
    pub broadcast_err: u64,
    pub reverted: u64,
    pub confirmation_timeout: u64,
    // 费用估算降级次数
    pub fee_fallback: u64,
    pub deployments: u64,
    // 链上成功但应用层状态分叉
    pub deployment_divergence: u64,
}

fn state() -> &'static Mutex<MetricsState> {
    METRICS.get_or_init(|| Mutex::new(MetricsState::default()))
}

fn update(f: impl FnOnce(&mut MetricsState)) {
    let mut s = match state().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    };
    f(&mut s);
}

pub fn inc_broadcast_ok() {
    update(|s| s.broadcast_ok += 1);
}

pub fn inc_broadcast_err() {
    update(|s| s.broadcast_err += 1);
}

pub fn inc_reverted() {
    update(|s| s.reverted += 1);
}

pub fn inc_confirmation_timeout() {
    update(|s| s.confirmation_timeout += 1);
}

pub fn inc_fee_fallback() {
    update(|s| s.fee_fallback += 1);
}

pub fn inc_deployment() {
    update(|s| s.deployments += 1);
}

pub fn inc_deployment_divergence() {
    update(|s| s.deployment_divergence += 1);
}

pub fn snapshot() -> MetricsState {
    match state().lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

/// 文本格式导出（Prometheus exposition）
pub fn render() -> String {
    let s = snapshot();
    let mut out = String::new();
    for (name, value) in [
        ("escrow_broadcast_ok_total", s.broadcast_ok),
        ("escrow_broadcast_err_total", s.broadcast_err),
        ("escrow_tx_reverted_total", s.reverted),
        ("escrow_confirmation_timeout_total", s.confirmation_timeout),
        ("escrow_fee_fallback_total", s.fee_fallback),
        ("escrow_deployments_total", s.deployments),
        ("escrow_deployment_divergence_total", s.deployment_divergence),
    ] {
        out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_monotonic() {
        let before = snapshot();
        inc_fee_fallback();
        inc_deployment_divergence();
        let after = snapshot();
        assert!(after.fee_fallback > before.fee_fallback);
        assert!(after.deployment_divergence > before.deployment_divergence);
        assert!(render().contains("escrow_fee_fallback_total"));
    }
}
