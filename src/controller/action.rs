use std::time::Duration;

/// What the worker should do with a key after a reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the delay
    Requeue(Duration),
    /// Wait for the next watch event
    AwaitChange,
}

impl Action {
    pub fn requeue(delay: Duration) -> Self {
        Action::Requeue(delay)
    }

    pub fn await_change() -> Self {
        Action::AwaitChange
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Action::Requeue(delay) => Some(*delay),
            Action::AwaitChange => None,
        }
    }
}
