//! Continuous-render cooperation with the frame driver.

use crossbeam::channel::{self, Receiver, Sender};
use hashbrown::HashSet;
use particulate_core::DrawableId;

/// Emitted when a drawable's active set changes between empty and non-empty.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActivityEvent {
    /// Particles became active; keep scheduling frames.
    Active { drawable: DrawableId, time: f64 },
    /// The last batch expired.
    Idle { drawable: DrawableId, time: f64 },
}

impl ActivityEvent {
    pub fn drawable(&self) -> DrawableId {
        match self {
            Self::Active { drawable, .. } | Self::Idle { drawable, .. } => *drawable,
        }
    }
}

/// Frame driver interface for continuous rendering.
pub trait FrameScheduler {
    fn add_continuous_render_request(&mut self, drawable: DrawableId);
    fn remove_continuous_render_request(&mut self, drawable: DrawableId);
}

/// Set of drawables that requested continuous rendering.
#[derive(Debug, Default)]
pub struct ContinuousRenderRequests {
    requests: HashSet<DrawableId>,
}

impl ContinuousRenderRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, drawable: DrawableId) -> bool {
        self.requests.contains(&drawable)
    }

    /// Whether any drawable wants frames.
    pub fn wants_frames(&self) -> bool {
        !self.requests.is_empty()
    }
}

impl FrameScheduler for ContinuousRenderRequests {
    fn add_continuous_render_request(&mut self, drawable: DrawableId) {
        self.requests.insert(drawable);
    }

    fn remove_continuous_render_request(&mut self, drawable: DrawableId) {
        self.requests.remove(&drawable);
    }
}

/// Tracks activity transitions and fans events out to subscribers.
#[derive(Debug, Default)]
pub(crate) struct ActivityNotifier {
    subscribers: Vec<Sender<ActivityEvent>>,
    active: bool,
}

impl ActivityNotifier {
    pub(crate) fn subscribe(&mut self) -> Receiver<ActivityEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Record the current activity and emit an event on a transition.
    pub(crate) fn update(&mut self, drawable: DrawableId, active: bool, time: f64) {
        if active == self.active {
            return;
        }
        self.active = active;
        let event = if active {
            ActivityEvent::Active { drawable, time }
        } else {
            ActivityEvent::Idle { drawable, time }
        };
        tracing::debug!(drawable = drawable.0, active, "Particle activity changed");
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}
