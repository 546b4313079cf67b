//! Board access disciplines.
//!
//! A multiplayer room guards its board with exactly one of these, chosen
//! at creation from the room's [`DisciplinePolicy`]:
//!
//! - **Reader/writer**: snapshots share, row submissions are exclusive,
//!   waiting writers block new readers.
//! - **Barber shop**: every access, read or write, takes the single chair
//!   in queue order, so service order follows the queue policy.

mod barber;
mod reader_writer;

pub use barber::{BarberShop, ChairGuard};
pub use reader_writer::{ReadGuard, ReaderWriterLock, RwStats, WriteGuard};

use rowforge_protocol::{ClientId, DisciplinePolicy};

use crate::{QueuePolicy, SyncError};

/// What the caller intends to do inside the critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// The room's board access discipline.
pub enum AccessDiscipline {
    ReaderWriter(ReaderWriterLock),
    BarberShop(BarberShop),
}

impl AccessDiscipline {
    /// Builds the discipline a policy asks for. `capacity` sizes the
    /// barber shop's waiting room; the reader/writer lock ignores it.
    ///
    /// Opening a barber shop spawns its barber task, so this must run
    /// inside a tokio runtime.
    pub fn for_policy(policy: DisciplinePolicy, capacity: usize, max_waiting_time: u32) -> Self {
        match policy {
            DisciplinePolicy::ReaderWriter => Self::ReaderWriter(ReaderWriterLock::new()),
            DisciplinePolicy::BarberShop(order) => {
                let queue = QueuePolicy::new(order).with_max_waiting_time(max_waiting_time);
                Self::BarberShop(BarberShop::open(capacity, queue))
            }
        }
    }

    pub fn policy(&self) -> DisciplinePolicy {
        match self {
            Self::ReaderWriter(_) => DisciplinePolicy::ReaderWriter,
            Self::BarberShop(shop) => DisciplinePolicy::BarberShop(shop.policy().order),
        }
    }

    /// Waits for the board.
    ///
    /// # Errors
    /// [`SyncError::Closed`] if a barber shop closes while the caller
    /// waits. The reader/writer lock cannot fail.
    pub async fn enter_critical_access(
        &self,
        client_id: ClientId,
        premium: bool,
        mode: AccessMode,
    ) -> Result<CriticalAccess<'_>, SyncError> {
        let access = match (self, mode) {
            (Self::ReaderWriter(rw), AccessMode::Read) => CriticalAccess::Read(rw.read().await),
            (Self::ReaderWriter(rw), AccessMode::Write) => CriticalAccess::Write(rw.write().await),
            (Self::BarberShop(shop), _) => {
                CriticalAccess::Chair(shop.enter(client_id, premium).await?)
            }
        };
        tracing::trace!(%client_id, ?mode, "entered critical access");
        Ok(access)
    }
}

/// Proof of access to the board. Dropping it releases access too;
/// [`leave_critical_access`](Self::leave_critical_access) additionally
/// waits for a barber's acknowledgement.
#[must_use = "access is released as soon as the guard is dropped"]
pub enum CriticalAccess<'a> {
    Read(ReadGuard<'a>),
    Write(WriteGuard<'a>),
    Chair(ChairGuard),
}

impl CriticalAccess<'_> {
    pub async fn leave_critical_access(self) {
        match self {
            Self::Read(guard) => drop(guard),
            Self::Write(guard) => drop(guard),
            Self::Chair(chair) => chair.leave().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use rowforge_protocol::QueueOrder;

    use super::*;

    #[tokio::test]
    async fn test_for_policy_matches_requested_kind() {
        let rw = AccessDiscipline::for_policy(DisciplinePolicy::ReaderWriter, 3, 3);
        assert_eq!(rw.policy(), DisciplinePolicy::ReaderWriter);

        let policy = DisciplinePolicy::BarberShop(QueueOrder::DynamicPriority);
        let shop = AccessDiscipline::for_policy(policy, 3, 3);
        assert_eq!(shop.policy(), policy);
    }

    #[tokio::test]
    async fn test_enter_and_leave_both_kinds() {
        for policy in [
            DisciplinePolicy::ReaderWriter,
            DisciplinePolicy::BarberShop(QueueOrder::Fifo),
        ] {
            let discipline = AccessDiscipline::for_policy(policy, 2, 3);
            for mode in [AccessMode::Read, AccessMode::Write] {
                let access = discipline
                    .enter_critical_access(ClientId(1), false, mode)
                    .await
                    .unwrap();
                access.leave_critical_access().await;
            }
        }
    }
}
