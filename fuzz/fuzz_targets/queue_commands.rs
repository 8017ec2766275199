#![no_main]

use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;
use tuneparty::model::{RequestId, TrackRef, TrackRequest};
use tuneparty::queue::OrderedQueue;

fuzz_target!(|data: &[u8]| {
    let mut queue = OrderedQueue::new();
    let mut issued: Vec<RequestId> = Vec::new();

    for (step, byte) in data.iter().enumerate() {
        let pick = |issued: &[RequestId]| {
            (!issued.is_empty()).then(|| issued[usize::from(*byte) % issued.len()].clone())
        };
        match byte % 4 {
            0 => {
                let request = TrackRequest::new(
                    TrackRef::new(format!("t{step}"), format!("Track {step}")),
                    "catalog",
                    "fuzz",
                );
                issued.push(queue.enqueue(request));
            }
            1 => {
                let _ = queue.try_dequeue();
            }
            2 => {
                if let Some(id) = pick(issued.as_slice()) {
                    let before = queue.len();
                    let moved = queue.top_by_id(&id);
                    assert_eq!(moved, queue.contains(&id));
                    assert_eq!(before, queue.len());
                    if moved {
                        assert_eq!(queue.snapshot()[0].request_id, id);
                    }
                }
            }
            _ => {
                if let Some(id) = pick(issued.as_slice()) {
                    let before = queue.len();
                    let removed = queue.remove_by_id(&id);
                    assert_eq!(queue.len(), before - usize::from(removed));
                    assert!(!queue.contains(&id));
                }
            }
        }

        let ids: HashSet<_> = queue.snapshot().into_iter().map(|e| e.request_id).collect();
        assert_eq!(ids.len(), queue.len());
    }
});
