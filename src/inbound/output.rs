//! Forwarding queue with placeholders for held content.

use crate::event::XmlEvent;
use std::collections::{HashMap, VecDeque};

/// Where processed events are forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Main,
    /// Content standing in for held EncryptedData k
    Hold(usize),
}

#[derive(Debug)]
enum Slot {
    Ready(XmlEvent),
    Held(usize),
}

#[derive(Debug, Default)]
struct Hold {
    slots: Vec<Slot>,
    released: bool,
}

/// Ordered output. A held slot blocks everything after it until released.
#[derive(Debug, Default)]
pub struct Output {
    main: VecDeque<Slot>,
    holds: HashMap<usize, Hold>,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&mut self, sink: Sink) -> Option<&mut Vec<Slot>> {
        match sink {
            Sink::Main => None,
            Sink::Hold(k) => Some(&mut self.holds.entry(k).or_default().slots),
        }
    }

    fn push(&mut self, sink: Sink, slot: Slot) {
        match self.slots(sink) {
            Some(slots) => slots.push(slot),
            None => self.main.push_back(slot),
        }
    }

    pub fn emit(&mut self, sink: Sink, event: XmlEvent) {
        self.push(sink, Slot::Ready(event));
    }

    /// Reserve the current position of `sink` for the content of hold `k`.
    pub fn hold(&mut self, sink: Sink, k: usize) {
        self.holds.entry(k).or_default();
        self.push(sink, Slot::Held(k));
    }

    pub fn release(&mut self, k: usize) {
        self.holds.entry(k).or_default().released = true;
    }

    /// Holds not yet released.
    pub fn pending(&self) -> usize {
        self.holds.values().filter(|h| !h.released).count()
    }

    /// Next forwardable event, if the front of the queue is not held.
    pub fn pop(&mut self) -> Option<XmlEvent> {
        loop {
            match self.main.pop_front()? {
                Slot::Ready(event) => return Some(event),
                Slot::Held(k) => {
                    let released = self.holds.get(&k).map(|h| h.released).unwrap_or(false);
                    if !released {
                        self.main.push_front(Slot::Held(k));
                        return None;
                    }
                    if let Some(hold) = self.holds.remove(&k) {
                        for slot in hold.slots.into_iter().rev() {
                            self.main.push_front(slot);
                        }
                    }
                }
            }
        }
    }
}
