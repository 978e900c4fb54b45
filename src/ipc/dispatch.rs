use log::{info, warn};
use std::collections::VecDeque;

use crate::debounce::MenuEvent;
use crate::pipeline::UiEvent;
use crate::swipe::SwipeDirection;

/// Events kept for `posectl events` between client reads.
pub const OUTBOX_CAPACITY: usize = 256;

pub fn event_key(ev: &UiEvent) -> &'static str {
    match ev {
        UiEvent::Menu(MenuEvent::Next) => "menu.next",
        UiEvent::Menu(MenuEvent::Prev) => "menu.prev",
        UiEvent::Menu(MenuEvent::Select) => "menu.select",
        UiEvent::Confirm => "hold.confirm",
        UiEvent::Swipe(SwipeDirection::Left) => "swipe.left",
        UiEvent::Swipe(SwipeDirection::Right) => "swipe.right",
    }
}

/// Bounded queue of UI events waiting for a client; oldest are dropped first.
#[derive(Debug)]
pub struct Outbox {
    queue: VecDeque<UiEvent>,
    capacity: usize,
    dropped: u64,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, ev: UiEvent) {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
            if self.dropped == 1 || self.dropped % 100 == 0 {
                warn!("event outbox full; {} events dropped so far", self.dropped);
            }
        }
        self.queue.push_back(ev);
    }

    pub fn drain(&mut self) -> Vec<UiEvent> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

pub fn dispatch_event(ev: UiEvent, outbox: &mut Outbox) {
    info!("[gesture] {}", event_key(&ev));
    outbox.push(ev);
}
