//! Cooperative lock over the cabinet floor
//!
//! Mechanisms whose parts sweep across the playfield (excavator, stackers,
//! sweepers, towers) must hold the lock while they move. The lock never
//! blocks: a mechanism polls [`FloorLock::can_proceed`] from its activating
//! state and simply stays there until the floor is free.

use crate::mechanisms::MechanismId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloorLock {
    holder: Option<MechanismId>,
}

impl FloorLock {
    pub fn new() -> Self {
        Self { holder: None }
    }

    /// Take the lock if it is free; re-acquiring or acquiring a held lock is a no-op
    pub fn acquire(&mut self, id: MechanismId) {
        if self.holder.is_none() {
            log::debug!("floor lock acquired by {}", id.as_str());
            self.holder = Some(id);
        }
    }

    /// Free the lock if `id` holds it
    pub fn release(&mut self, id: MechanismId) {
        if self.holder == Some(id) {
            log::debug!("floor lock released by {}", id.as_str());
            self.holder = None;
        }
    }

    pub fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    pub fn holder(&self) -> Option<MechanismId> {
        self.holder
    }

    /// Free, or already held by `id`
    pub fn can_proceed(&self, id: MechanismId) -> bool {
        self.holder.is_none_or(|holder| holder == id)
    }

    pub(crate) fn restore(holder: Option<MechanismId>) -> Self {
        Self { holder }
    }
}
