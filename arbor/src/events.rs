//! Typed pub/sub for structural changes. The bus lives on the engine
//! instance, never in process-wide state; subscribers register at startup.
//! `moving` is haltable (any `false` vetoes the move), `moved` and the
//! lifecycle channel are fire-and-forget.

use crate::node::Node;
use crate::operations::move_to::Position;

/// Lifecycle stations reported on the observer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Creating,
    Saving,
    Saved,
    Deleting,
    Restoring,
    Restored,
}

/// Payload of `moving`/`moved`.
pub struct MoveEvent<'a> {
    pub node: &'a Node,
    pub target: Option<&'a Node>,
    pub position: Position,
}

type MovingHandler = Box<dyn Fn(&MoveEvent) -> bool + Send + Sync>;
type MovedHandler = Box<dyn Fn(&MoveEvent) + Send + Sync>;
type LifecycleHandler = Box<dyn Fn(Action, &Node) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    moving: Vec<MovingHandler>,
    moved: Vec<MovedHandler>,
    lifecycle: Vec<LifecycleHandler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_moving(&mut self, handler: impl Fn(&MoveEvent) -> bool + Send + Sync + 'static) {
        self.moving.push(Box::new(handler));
    }

    pub fn on_moved(&mut self, handler: impl Fn(&MoveEvent) + Send + Sync + 'static) {
        self.moved.push(Box::new(handler));
    }

    pub fn observe(&mut self, handler: impl Fn(Action, &Node) + Send + Sync + 'static) {
        self.lifecycle.push(Box::new(handler));
    }

    /// Haltable dispatch: `false` as soon as any subscriber vetoes.
    pub(crate) fn until_moving(&self, event: &MoveEvent) -> bool {
        self.moving.iter().all(|handler| handler(event))
    }

    pub(crate) fn notify_moved(&self, event: &MoveEvent) {
        for handler in &self.moved {
            handler(event);
        }
    }

    pub(crate) fn notify(&self, action: Action, node: &Node) {
        for handler in &self.lifecycle {
            handler(action, node);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("moving", &self.moving.len())
            .field("moved", &self.moved.len())
            .field("lifecycle", &self.lifecycle.len())
            .finish()
    }
}
