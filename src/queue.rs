use crate::model::{QueueEntry, RequestId, TrackRequest};
use rand::Rng;
use std::collections::VecDeque;

const REQUEST_ID_LEN: usize = 8;
const REQUEST_ID_CHARS: &[u8] = b"0123456789abcdef";

#[derive(Debug, Clone, Default)]
pub struct OrderedQueue {
    entries: VecDeque<QueueEntry>,
}

impl OrderedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.position(request_id).is_some()
    }

    pub fn get(&self, request_id: &RequestId) -> Option<&QueueEntry> {
        self.entries
            .iter()
            .find(|entry| &entry.request_id == request_id)
    }

    pub fn enqueue(&mut self, request: TrackRequest) -> RequestId {
        let request_id = self.fresh_request_id();
        self.entries.push_back(QueueEntry {
            request_id: request_id.clone(),
            track: request.track,
            provider: request.provider,
            requester_id: request.requester_id,
        });
        request_id
    }

    pub fn try_dequeue(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    pub fn remove_by_id(&mut self, request_id: &RequestId) -> bool {
        match self.position(request_id) {
            Some(index) => self.entries.remove(index).is_some(),
            None => false,
        }
    }

    pub fn top_by_id(&mut self, request_id: &RequestId) -> bool {
        let Some(index) = self.position(request_id) else {
            return false;
        };
        if index > 0
            && let Some(entry) = self.entries.remove(index)
        {
            self.entries.push_front(entry);
        }
        true
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.iter().cloned().collect()
    }

    fn position(&self, request_id: &RequestId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| &entry.request_id == request_id)
    }

    fn fresh_request_id(&self) -> RequestId {
        loop {
            let candidate = generate_request_id();
            if !self.contains(&candidate) {
                return candidate;
            }
        }
    }
}

fn generate_request_id() -> RequestId {
    let mut rng = rand::rng();
    let mut out = String::with_capacity(REQUEST_ID_LEN);
    for _ in 0..REQUEST_ID_LEN {
        let idx = rng.random_range(0..REQUEST_ID_CHARS.len());
        out.push(char::from(REQUEST_ID_CHARS[idx]));
    }
    RequestId::new(out)
}
