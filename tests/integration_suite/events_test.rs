/*!
 * Event Delivery
 * Queue semantics seen by synchronous and async consumers
 */

use gpuv_sched::monitoring::{EventQueue, EventSink, SchedEvent, SchedEventKind};
use gpuv_sched::SchedBlock;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_async_consumer_sees_posted_events() {
    let queue = EventQueue::new();
    queue.post(SchedEvent::new(SchedEventKind::SchedResetVf, 2, SchedBlock::Gfx));

    let event = tokio_test::block_on(queue.recv_async());
    assert_eq!(
        event,
        Some(SchedEvent::new(SchedEventKind::SchedResetVf, 2, SchedBlock::Gfx))
    );
}

#[tokio::test]
async fn test_async_consumer_waits_for_producer_thread() {
    let queue = Arc::new(EventQueue::new());
    let producer = queue.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        producer.post(
            SchedEvent::new(SchedEventKind::CollectDiagData, 5, SchedBlock::Vcn)
                .with_reason("engine 2 stalled"),
        );
    });

    let event = tokio::time::timeout(Duration::from_secs(5), queue.recv_async())
        .await
        .expect("event within deadline")
        .unwrap();
    handle.join().unwrap();
    assert_eq!(event.kind, SchedEventKind::CollectDiagData);
    assert_eq!(event.reason.as_deref(), Some("engine 2 stalled"));
}

#[test]
fn test_concurrent_producers_lose_nothing() {
    let queue = Arc::new(EventQueue::new());
    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let q = queue.clone();
            thread::spawn(move || {
                for i in 0..250u32 {
                    let f = (t * 250 + i) % 31;
                    q.post(SchedEvent::new(SchedEventKind::SchedResetVf, f, SchedBlock::Gfx));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(queue.drain().len(), 1000);
    assert!(queue.try_recv().is_none());
}

#[test]
fn test_event_serializes_with_wire_names() {
    let ev = SchedEvent::new(SchedEventKind::HwSchedResetVf, 1, SchedBlock::Gfx);
    let json = serde_json::to_value(&ev).unwrap();
    assert_eq!(json["kind"], "hw_sched_reset_vf");
    assert_eq!(json["function"], 1);

    let back: SchedEvent = serde_json::from_value(json).unwrap();
    assert_eq!(back, ev);
}

#[test]
fn test_unknown_wire_id_is_rejected() {
    for kind in [
        SchedEventKind::ForceResetVf,
        SchedEventKind::SchedResetVf,
        SchedEventKind::HwSchedResetVf,
        SchedEventKind::CollectDiagData,
        SchedEventKind::SchedRma,
    ] {
        assert_eq!(SchedEventKind::from_id(kind.id()), Some(kind));
    }
    assert_eq!(SchedEventKind::from_id(0xff00), None);
}
