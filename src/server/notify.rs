//! The client registry and update notifications.
//!
//! Every accepted connection registers itself here. When the refresh task
//! has advanced the cache it broadcasts a [`SerialUpdate`] carrying the
//! session id and the serial the cache just reached, so a woken session
//! can put a Serial Notify on the wire without touching the store again.
//! The member list is snapshotted before fan-out; no send happens with
//! the lock held, so a slow router never stalls readers of the cache. A
//! session leaving — for whatever reason — unregisters itself by dropping
//! its receiver.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use futures::future::pending;
use log::debug;
use slab::Slab;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::mpsc::error::TrySendError;
use crate::serial::Serial;


//------------ SerialUpdate --------------------------------------------------

/// What a session is told when the cache has moved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SerialUpdate {
    pub session: u16,
    pub serial: Serial,
}


//------------ Registry ------------------------------------------------------

/// The set of currently connected sessions.
#[derive(Clone, Debug)]
pub struct Registry(Arc<Mutex<Slab<Member>>>);

#[derive(Debug)]
struct Member {
    peer: SocketAddr,
    tx: Sender<SerialUpdate>,
}

impl Registry {
    pub fn new() -> Self {
        Registry(Arc::new(Mutex::new(Slab::new())))
    }

    /// Registers the session serving `peer`.
    pub fn register(&self, peer: SocketAddr) -> NotifyReceiver {
        // One slot is enough. If an update is still unread when the next
        // one arrives, the stale notify makes the router query and catch
        // up past both serials anyway.
        let (tx, rx) = channel(1);
        let id = self.0.lock().unwrap().insert(Member { peer, tx });
        debug!("RTR: registered session with {}", peer);
        NotifyReceiver {
            rx: Some(rx),
            registry: self.clone(),
            id,
        }
    }

    /// Tells every registered session where the cache stands now.
    pub fn notify_all(&self, update: SerialUpdate) {
        let members: Vec<(usize, Sender<SerialUpdate>)> = {
            self.0.lock().unwrap().iter().map(|(id, member)| {
                (id, member.tx.clone())
            }).collect()
        };
        let mut gone = Vec::new();
        for (id, tx) in members {
            match tx.try_send(update) {
                Ok(()) => {}
                // An unread update is already pending; good enough.
                Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }
        if !gone.is_empty() {
            let mut inner = self.0.lock().unwrap();
            for id in gone {
                let _ = inner.try_remove(id);
            }
        }
    }

    /// The number of currently registered sessions.
    pub fn client_count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn unregister(&self, id: usize) {
        // The slot may already be gone if a notify round found the
        // session closed first.
        if let Some(member) = self.0.lock().unwrap().try_remove(id) {
            debug!("RTR: unregistered session with {}", member.peer);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}


//------------ NotifyReceiver ------------------------------------------------

/// A session's membership in the registry.
#[derive(Debug)]
pub struct NotifyReceiver {
    rx: Option<Receiver<SerialUpdate>>,
    registry: Registry,
    id: usize,
}

impl NotifyReceiver {
    /// Waits for the next update.
    ///
    /// Pends forever once the channel is gone; the session then only
    /// ever wakes for socket events.
    pub async fn recv(&mut self) -> SerialUpdate {
        if let Some(ref mut rx) = self.rx {
            if let Some(update) = rx.recv().await {
                return update
            }
        }
        self.rx = None;
        pending().await
    }
}

impl Drop for NotifyReceiver {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn notify_carries_the_update() {
        let registry = Registry::new();
        let mut receiver = registry.register(peer(1));
        assert_eq!(registry.client_count(), 1);

        let update = SerialUpdate {
            session: 42,
            serial: Serial::from(7),
        };
        registry.notify_all(update);
        assert_eq!(receiver.recv().await, update);
    }

    #[tokio::test]
    async fn unread_updates_coalesce() {
        let registry = Registry::new();
        let mut receiver = registry.register(peer(1));

        // Two rounds before the session gets to read. The second is
        // dropped; the stale notify still makes the router catch up.
        registry.notify_all(SerialUpdate {
            session: 42, serial: Serial::from(1)
        });
        registry.notify_all(SerialUpdate {
            session: 42, serial: Serial::from(2)
        });
        assert_eq!(receiver.recv().await.serial, Serial::from(1));
    }

    #[test]
    fn dropping_receiver_unregisters() {
        let registry = Registry::new();
        let one = registry.register(peer(1));
        let two = registry.register(peer(2));
        assert_eq!(registry.client_count(), 2);
        drop(one);
        assert_eq!(registry.client_count(), 1);
        drop(two);
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn notify_prunes_closed_channels() {
        let registry = Registry::new();
        let mut receiver = registry.register(peer(1));
        // A session whose channel died before its drop ran.
        receiver.rx.take();
        registry.notify_all(SerialUpdate {
            session: 42, serial: Serial::from(0)
        });
        assert_eq!(registry.client_count(), 0);
        // The later drop finds the slot already vacated.
        drop(receiver);
        assert_eq!(registry.client_count(), 0);
    }
}
