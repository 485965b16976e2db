use rk_telemetry::logging;

#[test]
fn test_init_logging_human() {
    // Should not panic; second call is a safe no-op.
    logging::init_logging("test-service", "debug");
    logging::init_logging("test-service", "info");

    tracing::info!(device_id = "r1", "human-readable log line");
}

#[test]
fn test_init_logging_json() {
    // The global subscriber may already be set by another test; this no-ops.
    logging::init_logging_json("test-service-json", "info");

    tracing::info!(task_id = "t1", "json log line");
}

#[test]
fn test_format_selection_accepts_any_case() {
    logging::init_logging_with_format("fmt-test", "warn", "JSON");
    logging::init_logging_with_format("fmt-test", "warn", "pretty");
}
