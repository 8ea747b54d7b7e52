//! Pending-command bookkeeping.
//!
//! Every phase-advancing command gets a freshly stamped [`CommandId`] and is
//! parked here until the peer first acknowledges it and then confirms it with
//! a status message. Duplicate outstanding commands of the same kind are legal
//! and resolve in first-in-first-out order.

use shared::domain::{CommandId, CommandKind, CommandPrefix, PendingCommand};

#[derive(Debug, Default)]
pub struct Correlator {
    pending: Vec<PendingCommand>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps a fresh command identifier for an outbound command.
    pub fn allocate(&self, prefix: CommandPrefix) -> CommandId {
        CommandId::now(prefix)
    }

    /// Records an outbound command awaiting acknowledgment.
    pub fn register(&mut self, id: CommandId, kind: CommandKind) {
        self.pending.push(PendingCommand {
            id,
            kind,
            acknowledged: false,
        });
    }

    /// Marks the oldest matching pending command as acknowledged.
    ///
    /// Returns the command kind on success, or `None` when no pending command
    /// carries this identifier (a stale or unsolicited acknowledgment).
    pub fn acknowledge(&mut self, id: &CommandId) -> Option<CommandKind> {
        let entry = self
            .pending
            .iter_mut()
            .find(|entry| !entry.acknowledged && entry.id == *id)?;
        entry.acknowledged = true;
        Some(entry.kind)
    }

    /// Whether any pending command of this kind has been acknowledged.
    pub fn is_acknowledged(&self, kind: CommandKind) -> bool {
        self.pending
            .iter()
            .any(|entry| entry.kind == kind && entry.acknowledged)
    }

    /// Removes and returns the oldest acknowledged pending command of this
    /// kind. Used when a confirming status message retires the exchange.
    pub fn consume(&mut self, kind: CommandKind) -> Option<PendingCommand> {
        let index = self
            .pending
            .iter()
            .position(|entry| entry.kind == kind && entry.acknowledged)?;
        Some(self.pending.remove(index))
    }

    /// Drops the oldest pending command of this kind regardless of
    /// acknowledgment, for peer-rejected exchanges.
    pub fn discard(&mut self, kind: CommandKind) -> Option<PendingCommand> {
        let index = self.pending.iter().position(|entry| entry.kind == kind)?;
        Some(self.pending.remove(index))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
