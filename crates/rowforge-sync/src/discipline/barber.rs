//! Single-chair barber shop.
//!
//! Customers take a seat in a bounded [`WaitQueue`]; one barber task
//! serves them one at a time in the queue's service order. A customer
//! holds the chair until it leaves, and the barber does not call the next
//! customer until the departing one has been acknowledged.
//!
//! ```text
//! customer            barber
//!   enqueue ───────►  dequeue
//!   await go  ◄──────  send Service{done, ack}
//!   ...critical...
//!   done ──────────►  await done
//!   await ack ◄──────  send ack, loop
//! ```

use std::sync::Arc;

use rowforge_protocol::ClientId;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{QueuePolicy, SyncError, WaitQueue};

/// Handed to the customer in the chair.
struct Service {
    done: oneshot::Sender<()>,
    ack: oneshot::Receiver<()>,
}

type Seat = oneshot::Sender<Service>;

/// One barber, `capacity` waiting seats.
pub struct BarberShop {
    seats: Arc<WaitQueue<Seat>>,
    barber: JoinHandle<()>,
}

impl BarberShop {
    /// Opens the shop and starts its barber task. Must be called inside a
    /// tokio runtime.
    pub fn open(capacity: usize, policy: QueuePolicy) -> Self {
        let seats = Arc::new(WaitQueue::new(capacity, policy));
        let barber = tokio::spawn(run_barber(Arc::clone(&seats)));
        Self { seats, barber }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.seats.policy()
    }

    /// Customers currently waiting (not counting the one in the chair).
    pub fn waiting(&self) -> usize {
        self.seats.len()
    }

    /// Takes a seat and waits to be served.
    ///
    /// Blocks while every seat is taken. Dropping the returned future
    /// gives the seat back.
    ///
    /// # Errors
    /// [`SyncError::Closed`] if the shop closes first.
    pub async fn enter(&self, client_id: ClientId, premium: bool) -> Result<ChairGuard, SyncError> {
        let (seat, go) = oneshot::channel();
        self.seats.enqueue(client_id, premium, seat).await?;

        let mut pending = PendingSeat {
            seats: &self.seats,
            client_id,
            armed: true,
        };
        let service = go.await.map_err(|_| SyncError::Closed)?;
        pending.armed = false;

        tracing::trace!(%client_id, "in the chair");
        Ok(ChairGuard {
            client_id,
            done: Some(service.done),
            ack: Some(service.ack),
        })
    }
}

impl Drop for BarberShop {
    fn drop(&mut self) {
        self.seats.close();
        self.barber.abort();
    }
}

async fn run_barber(seats: Arc<WaitQueue<Seat>>) {
    loop {
        let entry = match seats.dequeue().await {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(SyncError::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "barber dequeue failed");
                break;
            }
        };

        let client_id = entry.client_id;
        let (done_tx, done_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        let service = Service {
            done: done_tx,
            ack: ack_rx,
        };
        if entry.item.send(service).is_err() {
            tracing::debug!(%client_id, "customer left before being served");
            continue;
        }

        // Either an explicit leave or a dropped guard ends the service.
        let _ = done_rx.await;
        let _ = ack_tx.send(());
        tracing::trace!(%client_id, "served");
    }
    tracing::debug!("barber shop closed");
}

/// The chair. Hold it for the whole critical section.
#[must_use = "the chair is released as soon as the guard is dropped"]
pub struct ChairGuard {
    client_id: ClientId,
    done: Option<oneshot::Sender<()>>,
    ack: Option<oneshot::Receiver<()>>,
}

impl ChairGuard {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Leaves the chair and waits for the barber to acknowledge.
    pub async fn leave(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        if let Some(ack) = self.ack.take() {
            let _ = ack.await;
        }
    }
}

impl Drop for ChairGuard {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Gives the seat back if the customer stops waiting before service.
struct PendingSeat<'a> {
    seats: &'a WaitQueue<Seat>,
    client_id: ClientId,
    armed: bool,
}

impl Drop for PendingSeat<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.seats.remove(self.client_id);
        }
    }
}
