use std::collections::HashMap;

/// Liveness snapshot for one subsystem (a FeedClient, the SampleBuffer, the
/// order gateway). Updated in place as events flow through the owning
/// binary's main loop; read back only for the periodic diagnostic log.
#[derive(Clone, Debug, Default)]
pub struct SubsystemHealth {
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_tick_ms: Option<i64>,
    pub dropped: u64,
}

/// Process-wide health surface. Not thread-shared — each binary owns one
/// instance on its main task and folds events into it inline rather than
/// guarding it behind a mutex.
pub struct HealthSurface {
    subsystems: HashMap<&'static str, SubsystemHealth>,
}

impl HealthSurface {
    pub fn new(names: &[&'static str]) -> Self {
        let subsystems = names.iter().map(|&n| (n, SubsystemHealth::default())).collect();
        Self { subsystems }
    }

    pub fn record_tick(&mut self, name: &'static str, ts_ms: i64) {
        let s = self.subsystems.entry(name).or_default();
        s.connected = true;
        s.last_tick_ms = Some(ts_ms);
    }

    /// Marks a subsystem connected with no tick timestamp — used at spawn
    /// time, before the subsystem has reported anything of its own.
    pub fn mark_spawned(&mut self, name: &'static str) {
        self.subsystems.entry(name).or_default().connected = true;
    }

    pub fn record_drop(&mut self, name: &'static str) {
        self.subsystems.entry(name).or_default().dropped += 1;
    }

    pub fn record_error(&mut self, name: &'static str, err: impl ToString) {
        let s = self.subsystems.entry(name).or_default();
        s.connected = false;
        s.last_error = Some(err.to_string());
    }

    /// One bracket-tagged line per subsystem, staleness judged against
    /// `now_ms - last_tick_ms > stale_after_ms`.
    pub fn log(&self, now_ms: i64, stale_after_ms: i64) {
        for (name, s) in &self.subsystems {
            let age = s.last_tick_ms.map(|t| now_ms - t);
            let stale = age.map_or(true, |a| a > stale_after_ms);
            eprintln!(
                "[HEALTH] {:<18} connected={} stale={} last_tick_age_ms={} dropped={} last_error={}",
                name,
                s.connected && !stale,
                stale,
                age.map(|a| a.to_string()).unwrap_or_else(|| "never".to_string()),
                s.dropped,
                s.last_error.as_deref().unwrap_or("-"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A subsystem that has never ticked reports stale with no age.
    #[test]
    fn test_never_ticked_is_stale() {
        let health = HealthSurface::new(&["cex"]);
        assert!(health.subsystems["cex"].last_tick_ms.is_none());
    }

    /// Recording a tick marks the subsystem connected and stamps the tick time.
    #[test]
    fn test_record_tick_marks_connected() {
        let mut health = HealthSurface::new(&["cex"]);
        health.record_tick("cex", 1_000);
        let s = &health.subsystems["cex"];
        assert!(s.connected);
        assert_eq!(s.last_tick_ms, Some(1_000));
    }

    /// Recording an error flips connected back to false and remembers the message.
    #[test]
    fn test_record_error_marks_disconnected() {
        let mut health = HealthSurface::new(&["cex"]);
        health.record_tick("cex", 1_000);
        health.record_error("cex", "reconnect attempts exhausted (50)");
        let s = &health.subsystems["cex"];
        assert!(!s.connected);
        assert_eq!(s.last_error.as_deref(), Some("reconnect attempts exhausted (50)"));
    }
}
