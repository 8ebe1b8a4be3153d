use crate::step::Step;
use crate::types::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub previous: SessionState,
    pub current: SessionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type StateCallback = Box<dyn FnMut(&StateChange) + Send>;
type StepCallback = Box<dyn FnMut(&Step) + Send>;

#[derive(Default)]
pub struct Observers {
    next_id: u64,
    state: Vec<(SubscriptionId, StateCallback)>,
    steps: Vec<(SubscriptionId, StepCallback)>,
}

impl Observers {
    pub fn subscribe_state(
        &mut self,
        callback: impl FnMut(&StateChange) + Send + 'static,
    ) -> SubscriptionId {
        let id = self.allocate();
        self.state.push((id, Box::new(callback)));
        id
    }

    pub fn subscribe_steps(&mut self, callback: impl FnMut(&Step) + Send + 'static) -> SubscriptionId {
        let id = self.allocate();
        self.steps.push((id, Box::new(callback)));
        id
    }

    /// Returns `true` when a subscription was removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.state.len() + self.steps.len();
        self.state.retain(|(sub, _)| *sub != id);
        self.steps.retain(|(sub, _)| *sub != id);
        before != self.state.len() + self.steps.len()
    }

    pub fn len(&self) -> usize {
        self.state.len() + self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn notify_state(&mut self, change: &StateChange) {
        for (_, callback) in &mut self.state {
            callback(change);
        }
    }

    pub(crate) fn notify_step(&mut self, step: &Step) {
        for (_, callback) in &mut self.steps {
            callback(step);
        }
    }

    fn allocate(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("state_subscribers", &self.state.len())
            .field("step_subscribers", &self.steps.len())
            .finish()
    }
}
