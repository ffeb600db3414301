use pdu_telemetry::{metrics, new_request_ids, record_poll_success, record_publish_dropped};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
    assert_ne!(ids.request_id, ids.trace_id);
}

#[test]
fn counters_accumulate() {
    let before = metrics().snapshot();
    record_poll_success(7);
    record_publish_dropped();
    let after = metrics().snapshot();
    assert!(after.poll_success >= before.poll_success + 1);
    assert!(after.poll_latency_ms_total >= before.poll_latency_ms_total + 7);
    assert!(after.publish_dropped >= before.publish_dropped + 1);
}
