//! Swipe-to-delete gesture state machine.
//!
//! Displacements are cumulative from the gesture start. Only rightward
//! displacement can commit; a leftward drag is tracked so it does not
//! count as scrolling, but always snaps back.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SwipeState {
    Idle,
    Dragging { offset: f32 },
    Committed,
    SnappedBack,
}

impl SwipeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::SnappedBack)
    }

    /// Translation to render; the row never moves left of its rest position.
    pub fn visual_offset(self) -> f32 {
        match self {
            Self::Dragging { offset } => offset.max(0.0),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwipeConfig {
    pub viewport_width: f32,
    pub commit_ratio: f32,
    pub activation_offset: f32,
}

impl SwipeConfig {
    pub fn commit_threshold(&self) -> f32 {
        self.viewport_width * self.commit_ratio
    }
}

pub fn on_drag_update(state: SwipeState, delta_x: f32, config: &SwipeConfig) -> SwipeState {
    match state {
        SwipeState::Idle if delta_x.abs() > config.activation_offset => SwipeState::Dragging { offset: delta_x },
        SwipeState::Idle => SwipeState::Idle,
        SwipeState::Dragging { .. } => SwipeState::Dragging { offset: delta_x },
        terminal => terminal,
    }
}

pub fn on_drag_release(state: SwipeState, delta_x: f32, config: &SwipeConfig) -> SwipeState {
    match state {
        SwipeState::Dragging { .. } if delta_x > config.commit_threshold() => SwipeState::Committed,
        SwipeState::Dragging { .. } => SwipeState::SnappedBack,
        SwipeState::Idle => SwipeState::Idle,
        terminal => terminal,
    }
}

/// Gesture state for every rendered row, keyed by candidate id.
#[derive(Debug, Default)]
pub struct SwipeTracker {
    gestures: HashMap<String, SwipeState>,
}

impl SwipeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, item_id: &str) -> SwipeState {
        self.gestures.get(item_id).copied().unwrap_or(SwipeState::Idle)
    }

    pub fn drag_update(&mut self, item_id: &str, delta_x: f32, config: &SwipeConfig) -> SwipeState {
        let current = match self.state(item_id) {
            // a finished gesture never carries into the next one
            state if state.is_terminal() => SwipeState::Idle,
            state => state,
        };
        let next = on_drag_update(current, delta_x, config);
        self.gestures.insert(item_id.to_string(), next);
        next
    }

    /// Returns `true` exactly once per committed gesture.
    pub fn drag_release(&mut self, item_id: &str, delta_x: f32, config: &SwipeConfig) -> bool {
        let current = self.state(item_id);
        if current.is_terminal() {
            return false;
        }
        let next = on_drag_release(current, delta_x, config);
        if next == SwipeState::Idle {
            self.gestures.remove(item_id);
            return false;
        }
        self.gestures.insert(item_id.to_string(), next);
        next == SwipeState::Committed
    }

    pub fn forget(&mut self, item_id: &str) {
        self.gestures.remove(item_id);
    }

    pub fn retain_items<'a>(&mut self, live_ids: impl IntoIterator<Item = &'a str>) {
        let live = live_ids.into_iter().collect::<std::collections::HashSet<_>>();
        self.gestures.retain(|id, _| live.contains(id.as_str()));
    }
}
