//! Splits the snapshots of one streamed document into finalized slot objects.
//!
//! A slot's object is final once a later slot has started in the snapshot, or once the
//! stream ends. Each slot is released at most once and always in slot order.

use crate::schema::SlotLayout;
use serde_json::{Map, Value};

#[derive(Debug)]
pub struct SlotDemuxer {
    layout: SlotLayout,
    /// Slots released so far (array layouts) or the last released key (fixed count).
    /// Keyed snapshots rely on `serde_json`'s `preserve_order`, so map order is text order.
    cursor: usize,
    latest: Option<Value>,
}

impl SlotDemuxer {
    pub fn new(layout: SlotLayout) -> Self {
        Self {
            layout,
            cursor: 0,
            latest: None,
        }
    }

    /// Take a new snapshot and release the slots it proves complete.
    pub fn push(&mut self, snapshot: Value) -> Vec<(usize, Value)> {
        let ready = self.release(&snapshot, false);
        self.latest = Some(snapshot);
        ready
    }

    /// The stream ended; release every remaining slot of the last snapshot.
    pub fn finish(&mut self) -> Vec<(usize, Value)> {
        match self.latest.take() {
            Some(snapshot) => self.release(&snapshot, true),
            None => Vec::new(),
        }
    }

    fn release(&mut self, snapshot: &Value, complete: bool) -> Vec<(usize, Value)> {
        match (&self.layout, snapshot) {
            (SlotLayout::FixedCount { count }, Value::Object(map)) => {
                let count = *count;
                self.release_keyed(map, count, complete)
            }
            (SlotLayout::Sequenced { slots }, Value::Array(items)) => {
                let limit = slots.len();
                self.release_items(items, Some(limit), complete)
            }
            (SlotLayout::Unbounded, Value::Array(items)) => {
                self.release_items(items, None, complete)
            }
            _ => Vec::new(),
        }
    }

    fn release_items(
        &mut self,
        items: &[Value],
        limit: Option<usize>,
        complete: bool,
    ) -> Vec<(usize, Value)> {
        let available = if complete {
            items.len()
        } else {
            items.len().saturating_sub(1)
        };
        let end = limit.map_or(available, |limit| available.min(limit));
        let ready: Vec<(usize, Value)> = (self.cursor..end)
            .map(|index| (index, items[index].clone()))
            .collect();
        self.cursor = self.cursor.max(end);
        ready
    }

    /// Keyed slots in text order: the last key may still be streaming, so it stays open
    /// until another key follows it or the stream ends.
    fn release_keyed(
        &mut self,
        map: &Map<String, Value>,
        count: usize,
        complete: bool,
    ) -> Vec<(usize, Value)> {
        let open = if complete { None } else { map.keys().last() };
        let mut closed: Vec<(usize, &Value)> = map
            .iter()
            .filter(|(key, _)| Some(*key) != open)
            .filter_map(|(key, value)| {
                let slot = key.trim().parse::<usize>().ok()?;
                (1..=count).contains(&slot).then_some((slot, value))
            })
            .collect();
        closed.sort_by_key(|(slot, _)| *slot);
        closed.dedup_by_key(|(slot, _)| *slot);

        let mut ready = Vec::new();
        for (key, value) in closed {
            if key <= self.cursor {
                continue;
            }
            if !complete && key != self.cursor + 1 {
                break;
            }
            ready.push((key - 1, value.clone()));
            self.cursor = key;
        }
        ready
    }
}
