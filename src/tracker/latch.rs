//! Outcome latch: the one-way `Active -> Settled` transition of a tracked job.

/// Two-state machine holding the settled outcome once there is one.
///
/// The only transition is `Active -> Settled`. Observations offered to a
/// settled latch are refused; callers act on an observation only when
/// [`Latch::settle`] accepted it or the latch is still active.
#[derive(Debug, Clone, PartialEq)]
pub enum Latch<T> {
    Active,
    Settled(T),
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Latch::Active
    }
}

impl<T> Latch<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Latch::Active)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Latch::Settled(_))
    }

    /// Settle with `outcome`. Returns `false` and leaves the latch untouched
    /// if it had already settled.
    pub fn settle(&mut self, outcome: T) -> bool {
        match self {
            Latch::Active => {
                *self = Latch::Settled(outcome);
                true
            }
            Latch::Settled(_) => false,
        }
    }

    pub fn outcome(&self) -> Option<&T> {
        match self {
            Latch::Active => None,
            Latch::Settled(outcome) => Some(outcome),
        }
    }

    pub fn into_outcome(self) -> Option<T> {
        match self {
            Latch::Active => None,
            Latch::Settled(outcome) => Some(outcome),
        }
    }
}
