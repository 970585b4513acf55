//! Notification coalescing.
//!
//! [`NotificationCoalescer`] decides when a render/deliver cycle runs and
//! whether it posts a new status message or edits the live one. It holds no
//! I/O: the engine asks it for a [`Cycle`], performs the delivery, and reports
//! the outcome back. At most one cycle is in flight; changes observed in the
//! meantime are merged and produce exactly one follow-up cycle, rendered from
//! a fresh snapshot.

use laundry_proto::{ChatTarget, Delivered, DeliveryError, OutboundHandle};
use tracing::{debug, info, warn};

use crate::registry::{ChangeSet, RegistrySnapshot};

/// What a delivery cycle does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Post a new message, which becomes the live handle.
    Send(ChatTarget),
    /// Edit the live message in place.
    Edit(OutboundHandle),
}

#[derive(Debug)]
enum Phase {
    Idle,
    InFlight {
        cycle: Cycle,
        snapshot: RegistrySnapshot,
    },
}

/// Owner of the live [`OutboundHandle`] and the render/deliver state machine.
#[derive(Debug)]
pub struct NotificationCoalescer {
    default_target: Option<ChatTarget>,
    handle: Option<OutboundHandle>,
    phase: Phase,
    pending: ChangeSet,
    repost: Option<ChatTarget>,
    last_rendered: Option<RegistrySnapshot>,
}

impl NotificationCoalescer {
    /// `default_target` receives the first status message. Without one, no
    /// message is posted until a repost is requested.
    pub fn new(default_target: Option<ChatTarget>) -> Self {
        Self {
            default_target,
            handle: None,
            phase: Phase::Idle,
            pending: ChangeSet::new(),
            repost: None,
            last_rendered: None,
        }
    }

    /// The live status message, if one has been posted.
    pub fn handle(&self) -> Option<OutboundHandle> {
        self.handle
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// True when a cycle should start as soon as the coalescer is idle.
    pub fn has_pending_work(&self) -> bool {
        !self.pending.is_empty() || self.repost.is_some()
    }

    /// Records changed slots. Empty change sets are ignored.
    pub fn observe(&mut self, changes: ChangeSet) {
        if !changes.is_empty() {
            self.pending.merge(changes);
        }
    }

    /// Asks for a fresh status message in `target` that replaces the live one.
    pub fn request_repost(&mut self, target: ChatTarget) {
        self.repost = Some(target);
    }

    /// Starts a cycle for `snapshot` if idle and there is work to do.
    ///
    /// The snapshot must be taken right before the call so a follow-up cycle
    /// reflects every change merged while the previous one was in flight.
    pub fn start(&mut self, snapshot: &RegistrySnapshot) -> Option<Cycle> {
        if !self.is_idle() {
            return None;
        }

        let cycle = if let Some(target) = self.repost.take() {
            self.pending.clear();
            Cycle::Send(target)
        } else {
            if self.pending.is_empty() {
                return None;
            }
            let changed = std::mem::take(&mut self.pending);
            if self
                .last_rendered
                .as_ref()
                .is_some_and(|last| last.same_state(snapshot))
            {
                debug!(
                    changed = changed.len(),
                    "Status matches last render, skipping"
                );
                return None;
            }
            match (self.handle, self.default_target) {
                (Some(handle), _) => Cycle::Edit(handle),
                (None, Some(target)) => Cycle::Send(target),
                (None, None) => {
                    debug!(
                        changed = changed.len(),
                        "No status message or default chat, skipping"
                    );
                    return None;
                }
            }
        };

        self.phase = Phase::InFlight {
            cycle,
            snapshot: snapshot.clone(),
        };
        Some(cycle)
    }

    /// Applies the outcome of the in-flight cycle and returns to idle.
    ///
    /// Failures are not retried; the next observed change starts a new cycle.
    pub fn complete(&mut self, outcome: Result<Delivered, DeliveryError>) {
        let Phase::InFlight { cycle, snapshot } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            warn!("Delivery outcome reported with no cycle in flight");
            return;
        };

        match outcome {
            Ok(Delivered::Sent(handle)) => {
                match self.handle.replace(handle) {
                    Some(old) => info!(
                        old = old.message_id,
                        new = handle.message_id,
                        chat = %handle.target,
                        "Status message superseded"
                    ),
                    None => info!(
                        message_id = handle.message_id,
                        chat = %handle.target,
                        "Status message posted"
                    ),
                }
                self.last_rendered = Some(snapshot);
            }
            Ok(Delivered::Edited) => {
                debug!("Status message updated");
                self.last_rendered = Some(snapshot);
            }
            Err(e) => {
                warn!(cycle = ?cycle, error = %e, "Status delivery failed");
                if let Cycle::Edit(failed) = cycle
                    && e.is_target_gone()
                    && self.handle == Some(failed)
                {
                    info!(
                        message_id = failed.message_id,
                        "Status message is gone, next change posts a new one"
                    );
                    self.handle = None;
                    self.last_rendered = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BankLayout, MachineRegistry};
    use laundry_proto::{MachineClass, SlotKey};

    const TARGET: ChatTarget = ChatTarget {
        chat_id: -100,
        thread_id: Some(2),
    };

    fn handle(message_id: i32) -> OutboundHandle {
        OutboundHandle {
            target: TARGET,
            message_id,
        }
    }

    fn set(reg: &mut MachineRegistry, slot: u32, minutes: i64) -> ChangeSet {
        reg.set_remaining(MachineClass::Washer, slot, minutes).unwrap()
    }

    #[test]
    fn first_change_sends_then_later_changes_edit() {
        let mut reg = MachineRegistry::new(BankLayout::default());
        let mut co = NotificationCoalescer::new(Some(TARGET));

        co.observe(set(&mut reg, 3, 45));
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Send(TARGET)));
        co.complete(Ok(Delivered::Sent(handle(10))));
        assert_eq!(co.handle(), Some(handle(10)));
        assert!(co.is_idle());

        for minutes in [40, 35, 30] {
            co.observe(set(&mut reg, 3, minutes));
            assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Edit(handle(10))));
            co.complete(Ok(Delivered::Edited));
        }
        assert_eq!(co.handle(), Some(handle(10)));
    }

    #[test]
    fn changes_during_flight_merge_into_one_follow_up() {
        let mut reg = MachineRegistry::new(BankLayout::default());
        let mut co = NotificationCoalescer::new(Some(TARGET));

        co.observe(set(&mut reg, 1, 20));
        assert!(co.start(&reg.snapshot()).is_some());

        // Two more changes while the first delivery is outstanding.
        co.observe(set(&mut reg, 2, 30));
        assert_eq!(co.start(&reg.snapshot()), None);
        co.observe(set(&mut reg, 3, 40));
        assert_eq!(co.start(&reg.snapshot()), None);
        assert!(co.has_pending_work());

        co.complete(Ok(Delivered::Sent(handle(1))));
        let follow_up = reg.snapshot();
        assert_eq!(co.start(&follow_up), Some(Cycle::Edit(handle(1))));
        assert_eq!(follow_up.remaining(SlotKey::washer(2)), Some(30));
        assert_eq!(follow_up.remaining(SlotKey::washer(3)), Some(40));
        co.complete(Ok(Delivered::Edited));

        // Nothing left over.
        assert!(!co.has_pending_work());
        assert_eq!(co.start(&reg.snapshot()), None);
    }

    #[test]
    fn failure_returns_to_idle_without_retry() {
        let mut reg = MachineRegistry::new(BankLayout::default());
        let mut co = NotificationCoalescer::new(Some(TARGET));

        co.observe(set(&mut reg, 1, 20));
        co.start(&reg.snapshot());
        co.complete(Err(DeliveryError::Transport("unreachable".into())));

        assert!(co.is_idle());
        assert_eq!(co.handle(), None);
        assert_eq!(co.start(&reg.snapshot()), None);

        // The next change heals it.
        co.observe(set(&mut reg, 1, 19));
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Send(TARGET)));
    }

    #[test]
    fn edit_failure_keeps_handle_unless_target_is_gone() {
        let mut reg = MachineRegistry::new(BankLayout::default());
        let mut co = NotificationCoalescer::new(Some(TARGET));
        co.observe(set(&mut reg, 1, 20));
        co.start(&reg.snapshot());
        co.complete(Ok(Delivered::Sent(handle(5))));

        co.observe(set(&mut reg, 1, 19));
        co.start(&reg.snapshot());
        co.complete(Err(DeliveryError::RateLimited("retry after 3s".into())));
        assert_eq!(co.handle(), Some(handle(5)));

        co.observe(set(&mut reg, 1, 18));
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Edit(handle(5))));
        co.complete(Err(DeliveryError::EditTargetGone("deleted".into())));
        assert_eq!(co.handle(), None);

        co.observe(set(&mut reg, 1, 17));
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Send(TARGET)));
    }

    #[test]
    fn change_back_after_gone_target_still_posts() {
        let mut reg = MachineRegistry::new(BankLayout::default());
        let mut co = NotificationCoalescer::new(Some(TARGET));
        co.request_repost(TARGET);
        co.start(&reg.snapshot());
        co.complete(Ok(Delivered::Sent(handle(5))));

        co.observe(set(&mut reg, 1, 5));
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Edit(handle(5))));
        co.complete(Err(DeliveryError::EditTargetGone("deleted".into())));

        // Back to the state the deleted message showed.
        co.observe(set(&mut reg, 1, 0));
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Send(TARGET)));
    }

    #[test]
    fn unchanged_state_is_not_redelivered() {
        let mut reg = MachineRegistry::new(BankLayout::default());
        let mut co = NotificationCoalescer::new(Some(TARGET));
        co.observe(set(&mut reg, 1, 20));
        co.start(&reg.snapshot());
        co.complete(Ok(Delivered::Sent(handle(5))));

        // Up and back down again before the next cycle starts.
        co.observe(set(&mut reg, 1, 25));
        co.observe(set(&mut reg, 1, 20));
        assert_eq!(co.start(&reg.snapshot()), None);
        assert!(!co.has_pending_work());
    }

    #[test]
    fn without_default_target_nothing_is_sent() {
        let mut reg = MachineRegistry::new(BankLayout::default());
        let mut co = NotificationCoalescer::new(None);
        co.observe(set(&mut reg, 1, 20));
        assert_eq!(co.start(&reg.snapshot()), None);
        assert!(co.is_idle());
    }

    #[test]
    fn repost_supersedes_live_handle() {
        let mut reg = MachineRegistry::new(BankLayout::default());
        let mut co = NotificationCoalescer::new(None);
        let elsewhere = ChatTarget::new(77, None);

        co.request_repost(elsewhere);
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Send(elsewhere)));
        let first = OutboundHandle {
            target: elsewhere,
            message_id: 1,
        };
        co.complete(Ok(Delivered::Sent(first)));

        // A repost always delivers, even with no state change.
        co.request_repost(elsewhere);
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Send(elsewhere)));
        let second = OutboundHandle {
            target: elsewhere,
            message_id: 2,
        };
        co.complete(Ok(Delivered::Sent(second)));
        assert_eq!(co.handle(), Some(second));

        co.observe(set(&mut reg, 4, 9));
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Edit(second)));
    }

    #[test]
    fn repost_during_flight_is_deferred() {
        let mut reg = MachineRegistry::new(BankLayout::default());
        let mut co = NotificationCoalescer::new(Some(TARGET));
        co.observe(set(&mut reg, 1, 20));
        co.start(&reg.snapshot());

        co.request_repost(TARGET);
        assert_eq!(co.start(&reg.snapshot()), None);
        co.complete(Ok(Delivered::Sent(handle(1))));
        assert_eq!(co.start(&reg.snapshot()), Some(Cycle::Send(TARGET)));
    }

    #[test]
    fn stray_outcome_is_ignored() {
        let mut co = NotificationCoalescer::new(Some(TARGET));
        co.complete(Ok(Delivered::Sent(handle(3))));
        assert_eq!(co.handle(), None);
        assert!(co.is_idle());
    }
}
