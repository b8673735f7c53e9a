//! Keeping the cache fresh.
//!
//! The refresh task periodically re-ingests all VRP sources and applies
//! the result to the cache. An ingest failure only costs that round; the
//! previously served set and serial stay as they are. After every
//! successful round all registered sessions are woken so they can push a
//! Serial Notify, and the status task is told what happened.
//!
//! The status task is the process's only introspection surface: it logs
//! the outcome of each refresh round it is told about and, on a slow
//! timer, how many clients are connected and where the cache stands.

use std::time::Duration;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time;
use crate::payload::RoaSet;
use crate::serial::Serial;
use crate::server::notify::{Registry, SerialUpdate};
use crate::store::{Cache, UpdateOutcome};
use crate::vrp::Fetcher;


//------------ Configuration Constants ---------------------------------------

const STATUS_PERIOD: Duration = Duration::from_secs(3600);


//------------ RefreshEvent --------------------------------------------------

/// What the refresh task tells the status task after each round.
#[derive(Clone, Copy, Debug)]
pub enum RefreshEvent {
    Updated {
        serial: Serial,
        changed: bool,
    },
    Failed,
}


//------------ Refresh task --------------------------------------------------

pub async fn run(
    cache: Cache,
    fetcher: Fetcher,
    registry: Registry,
    period: Duration,
    status: mpsc::Sender<RefreshEvent>,
) {
    loop {
        time::sleep(period).await;
        let event = match fetcher.fetch_all().await {
            Ok(raw) => {
                let set = RoaSet::from_raw(raw);
                if set.is_empty() {
                    warn!(
                        "ingest produced an empty ROA set, \
                         withdrawing everything"
                    );
                }
                match cache.apply_update(set) {
                    UpdateOutcome::Advanced(diff) => {
                        info!(
                            "ROAs updated, serial is now {}: \
                             {} announced, {} withdrawn",
                            diff.new_serial,
                            diff.announce.len(),
                            diff.withdraw.len()
                        );
                        RefreshEvent::Updated {
                            serial: diff.new_serial,
                            changed: true,
                        }
                    }
                    UpdateOutcome::Unchanged(serial) => {
                        info!("no ROA changes, serial is now {}", serial);
                        RefreshEvent::Updated { serial, changed: false }
                    }
                }
            }
            Err(err) => {
                cache.record_error();
                warn!(
                    "unable to update ROAs, keeping existing set: {}", err
                );
                RefreshEvent::Failed
            }
        };
        if matches!(event, RefreshEvent::Updated { .. }) {
            // Read back after the advance so no session can see a notify
            // for a serial the store does not yet hold.
            let (session, serial) = cache.notify_info();
            registry.notify_all(SerialUpdate { session, serial });
        }
        let _ = status.try_send(event);
    }
}


//------------ Status task ---------------------------------------------------

pub async fn run_status(
    cache: Cache,
    registry: Registry,
    mut events: mpsc::Receiver<RefreshEvent>,
) {
    let mut ticker = time::interval(STATUS_PERIOD);
    // The first tick of an interval fires immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = cache.status();
                info!(
                    "{} clients connected, cache at serial {} \
                     with {} ROAs",
                    registry.client_count(),
                    status.serial,
                    status.roa_count
                );
            }
            event = events.recv() => {
                match event {
                    Some(RefreshEvent::Updated { serial, changed }) => {
                        debug!(
                            "refresh round done at serial {} \
                             (changed: {})",
                            serial, changed
                        );
                    }
                    Some(RefreshEvent::Failed) => {
                        debug!("refresh round failed");
                    }
                    // The refresh task is gone; so is our purpose.
                    None => return,
                }
            }
        }
    }
}


//============ Tests =========================================================
