use rk_telemetry::metrics::*;

#[test]
fn test_counter_increment() {
    let m = MetricsCollector::new();
    m.increment_counter(REMOTE_COMMANDS_TOTAL, &[("outcome", "success")]);
    m.increment_counter(REMOTE_COMMANDS_TOTAL, &[("outcome", "success")]);
    m.increment_counter(REMOTE_COMMANDS_TOTAL, &[("outcome", "remote_exec")]);

    assert_eq!(m.get_counter(REMOTE_COMMANDS_TOTAL, &[("outcome", "success")]), 2);
    assert_eq!(m.get_counter(REMOTE_COMMANDS_TOTAL, &[("outcome", "remote_exec")]), 1);
    assert_eq!(m.get_counter(REMOTE_COMMANDS_TOTAL, &[("outcome", "timeout")]), 0);
}

#[test]
fn test_counter_increment_by() {
    let m = MetricsCollector::new();
    m.increment_counter_by(BACKUPS_PRUNED_TOTAL, &[], 3);
    m.increment_counter_by(BACKUPS_PRUNED_TOTAL, &[], 4);
    assert_eq!(m.get_counter(BACKUPS_PRUNED_TOTAL, &[]), 7);
}

#[test]
fn test_gauge_set() {
    let m = MetricsCollector::new();
    m.set_gauge(POOL_SESSIONS, 5);
    assert_eq!(m.get_gauge(POOL_SESSIONS), 5);
    m.set_gauge(POOL_SESSIONS, 0);
    assert_eq!(m.get_gauge(POOL_SESSIONS), 0);
}

#[test]
fn test_labels_are_order_independent() {
    let a = Labels::new(&[("outcome", "ok"), ("kind", "olt")]);
    let b = Labels::new(&[("kind", "olt"), ("outcome", "ok")]);
    assert_eq!(a, b);
    assert_eq!(a.prometheus_str(), "{kind=\"olt\",outcome=\"ok\"}");
    assert_eq!(Labels::empty().prometheus_str(), "");
}

#[test]
fn test_prometheus_export_format() {
    let m = MetricsCollector::with_defaults();
    m.increment_counter(BACKUPS_TOTAL, &[("outcome", "created")]);
    m.set_gauge(POOL_SESSIONS, 2);
    m.record_histogram(REMOTE_COMMAND_DURATION, 0.3);

    let out = m.export_prometheus();
    assert!(out.contains("# TYPE backups_total counter"));
    assert!(out.contains("backups_total{outcome=\"created\"} 1"));
    assert!(out.contains("# TYPE pool_sessions gauge"));
    assert!(out.contains("pool_sessions 2"));
    assert!(out.contains("# TYPE remote_command_duration_seconds histogram"));
    assert!(out.contains("remote_command_duration_seconds_count 1"));
}

#[test]
fn test_global_metrics_is_singleton() {
    let m1 = global_metrics();
    let m2 = global_metrics();
    assert!(std::ptr::eq(m1, m2));
}

#[tokio::test]
async fn test_concurrent_increments() {
    let m = std::sync::Arc::new(MetricsCollector::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let m = m.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..100 {
                m.increment_counter(POOL_DIALS_TOTAL, &[]);
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(m.get_counter(POOL_DIALS_TOTAL, &[]), 800);
}
