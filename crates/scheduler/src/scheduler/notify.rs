use serde::Serialize;

/// Edge-triggered latch for one "work drained" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Latch {
    /// Waiting for its counter to reach zero.
    Armed,
    /// Delivered (or nothing to deliver) until the next schedule re-arms it.
    Fired,
}

impl Latch {
    /// Arm when `pending` is nonzero, otherwise park as fired.
    pub fn rearm(&mut self, pending: usize) {
        *self = if pending > 0 { Latch::Armed } else { Latch::Fired };
    }

    /// Fire if armed and drained. Returns `true` exactly once per arming.
    pub fn try_fire(&mut self, pending: usize) -> bool {
        if *self == Latch::Armed && pending == 0 {
            *self = Latch::Fired;
            true
        } else {
            false
        }
    }

    pub fn is_armed(self) -> bool {
        self == Latch::Armed
    }
}

/// Latches that fired during one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FiredNotifications {
    pub all_finished: bool,
    pub activation_finished: bool,
}

impl FiredNotifications {
    pub fn any(self) -> bool {
        self.all_finished || self.activation_finished
    }
}

/// Notification Gate: one latch for "all raster finished", one for
/// "all required-for-activation raster finished".
#[derive(Debug, Clone, Serialize)]
pub struct NotificationGate {
    all_finished: Latch,
    activation_finished: Latch,
}

impl Default for NotificationGate {
    fn default() -> Self {
        Self {
            all_finished: Latch::Fired,
            activation_finished: Latch::Fired,
        }
    }
}

impl NotificationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after every schedule with the new generation's counters.
    pub fn rearm(&mut self, pending: usize, pending_required: usize) {
        self.all_finished.rearm(pending);
        self.activation_finished.rearm(pending_required);
    }

    /// Fire every armed latch whose counter drained. Latches are disarmed
    /// here, before the caller runs any callback.
    pub fn poll(&mut self, pending: usize, pending_required: usize) -> FiredNotifications {
        FiredNotifications {
            activation_finished: self.activation_finished.try_fire(pending_required),
            all_finished: self.all_finished.try_fire(pending),
        }
    }

    pub fn disarm(&mut self) {
        self.all_finished = Latch::Fired;
        self.activation_finished = Latch::Fired;
    }

    pub fn all_finished(&self) -> Latch {
        self.all_finished
    }

    pub fn activation_finished(&self) -> Latch {
        self.activation_finished
    }
}
