//! The RTR server.
//!
//! The [`Server`] accepts router connections on its TCP listener and runs
//! one [`Connection`] task per session. A session answers reset and serial
//! queries from consistent cache snapshots and pushes a Serial Notify
//! whenever the refresh task wakes it through the registry. The protocol
//! version is latched from the first PDU a router sends; switching
//! versions mid-session, unsupported versions, and unexpected PDU types
//! are answered with an Error Report before the session closes.

pub mod notify;

use std::io;
use std::marker::Unpin;
use std::net::SocketAddr;
use futures::future;
use futures::future::Either;
use log::{debug, info, warn};
use pin_utils::pin_mut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::spawn;
use crate::payload::Action;
use crate::pdu;
use crate::pdu::DecodeError;
use crate::serial::Serial;
use crate::store::{DiffResponse, RoaSource};
use self::notify::{NotifyReceiver, Registry, SerialUpdate};


//------------ Server --------------------------------------------------------

pub struct Server<Store> {
    listener: TcpListener,
    registry: Registry,
    store: Store,
}

impl<Store: RoaSource> Server<Store> {
    pub fn new(
        listener: TcpListener, registry: Registry, store: Store
    ) -> Self {
        Server {
            listener, registry, store
        }
    }

    pub async fn run(self) {
        loop {
            let (sock, peer) = match self.listener.accept().await {
                Ok(some) => some,
                Err(err) => {
                    warn!("RTR: accept failed: {}", err);
                    continue
                }
            };
            info!(
                "RTR: connection from {}, total clients: {}",
                peer, self.registry.client_count() + 1
            );
            let conn = Connection::new(
                sock, peer, self.registry.register(peer), self.store.clone()
            );
            let _ = spawn(async move {
                if let Err(err) = conn.run().await {
                    info!("RTR: session with {} ended: {}", peer, err);
                }
            });
        }
    }
}


//------------ Connection ----------------------------------------------------

struct Connection<Sock, Store> {
    sock: Sock,
    peer: SocketAddr,
    notify: NotifyReceiver,
    store: Store,
    version: Option<u8>,
}

impl<Sock, Store> Connection<Sock, Store> {
    fn new(
        sock: Sock, peer: SocketAddr, notify: NotifyReceiver, store: Store
    ) -> Self {
        Connection {
            sock, peer, notify, store,
            version: None,
        }
    }

    fn version(&self) -> u8 {
        match self.version {
            Some(version) => version,
            None => pdu::VERSION_1
        }
    }
}

/// # High-level operation
///
impl<Sock, Store> Connection<Sock, Store>
where
    Sock: AsyncRead + AsyncWrite + Unpin + Sync + Send + 'static,
    Store: RoaSource
{
    async fn run(mut self) -> Result<(), io::Error> {
        while let Some(query) = self.recv().await? {
            match query {
                Query::Serial(serial) => {
                    self.serial(serial).await?
                }
                Query::Reset => {
                    self.reset().await?
                }
                Query::Error(report) => {
                    self.error(report).await?;
                    break
                }
                Query::Notify(update) => {
                    self.notify(update).await?
                }
            }
        }
        debug!("RTR: session with {} closed", self.peer);
        Ok(())
    }
}


/// # Receiving
///
impl<Sock, Store> Connection<Sock, Store>
where Sock: AsyncRead + Unpin {
    async fn recv(&mut self) -> Result<Option<Query>, io::Error> {
        loop {
            enum Selected {
                Notify(SerialUpdate),
                Frame((pdu::Header, Vec<u8>)),
                Err(DecodeError),
            }
            let selected = {
                let notify = self.notify.recv();
                let frame = pdu::read_pdu(&mut self.sock);
                pin_mut!(notify);
                pin_mut!(frame);
                match future::select(notify, frame).await {
                    Either::Left((update, _)) => Selected::Notify(update),
                    Either::Right((Ok(frame), _)) => Selected::Frame(frame),
                    Either::Right((Err(err), _)) => Selected::Err(err),
                }
            };
            let (header, body) = match selected {
                Selected::Notify(update) => {
                    return Ok(Some(Query::Notify(update)))
                }
                Selected::Frame(frame) => frame,
                Selected::Err(err) => return self.failed_read(err),
            };
            if let Err(err) = self.check_version(header) {
                return Ok(Some(err))
            }
            match header.pdu() {
                pdu::SerialQuery::PDU => {
                    debug!("RTR: got serial query from {}", self.peer);
                    if header.length() != pdu::SerialQuery::LEN {
                        debug!("RTR: ... with bad length");
                        return Ok(Some(Self::invalid_length(header)))
                    }
                    let payload = match pdu::SerialQueryPayload::read_from(
                        &body
                    ) {
                        Some(payload) => payload,
                        None => return Ok(Some(Self::invalid_length(header))),
                    };
                    return Ok(Some(Query::Serial(payload.serial())))
                }
                pdu::ResetQuery::PDU => {
                    debug!("RTR: got reset query from {}", self.peer);
                    if header.length() != pdu::ResetQuery::LEN {
                        debug!("RTR: ... with bad length");
                        return Ok(Some(Self::invalid_length(header)))
                    }
                    return Ok(Some(Query::Reset))
                }
                pdu::SerialNotify::PDU => {
                    // Only caches send these. Seeing one is odd but
                    // harmless.
                    debug!(
                        "RTR: ignoring serial notify from {}", self.peer
                    );
                }
                _ => {
                    debug!(
                        "RTR: got PDU type {} from {}",
                        header.pdu(), self.peer
                    );
                    return Ok(Some(Query::Error(pdu::ErrorReport::new(
                        header.version(),
                        pdu::err::UNSUPPORTED_PDU_TYPE,
                        header.as_ref(),
                        "expected Serial Query or Reset Query"
                    ))))
                }
            }
        }
    }

    /// Turns a failed frame read into the session's next step.
    ///
    /// A clean close and a mid-PDU close both simply end the session;
    /// everything else gets reported to the peer first.
    fn failed_read(
        &mut self, err: DecodeError
    ) -> Result<Option<Query>, io::Error> {
        match err {
            DecodeError::Eof => {
                Ok(None)
            }
            DecodeError::ShortRead => {
                debug!("RTR: {} closed mid-PDU", self.peer);
                Ok(None)
            }
            DecodeError::MalformedLength(length) => {
                debug!(
                    "RTR: malformed length {} from {}", length, self.peer
                );
                Ok(Some(Query::Error(pdu::ErrorReport::new(
                    self.version(),
                    pdu::err::CORRUPT_DATA,
                    &[],
                    "malformed PDU length"
                ))))
            }
            DecodeError::UnsupportedVersion(header) => {
                debug!(
                    "RTR: {} speaks unsupported version {}",
                    self.peer, header.version()
                );
                Ok(Some(Query::Error(pdu::ErrorReport::new(
                    header.version(),
                    pdu::err::UNSUPPORTED_VERSION,
                    header.as_ref(),
                    "only versions 1 and 2 supported"
                ))))
            }
            DecodeError::InvalidType(header) => {
                debug!(
                    "RTR: invalid PDU type {} from {}",
                    header.pdu(), self.peer
                );
                Ok(Some(Query::Error(pdu::ErrorReport::new(
                    header.version(),
                    pdu::err::UNSUPPORTED_PDU_TYPE,
                    header.as_ref(),
                    "invalid PDU type"
                ))))
            }
            DecodeError::Io(err) => Err(err),
        }
    }

    fn check_version(&mut self, header: pdu::Header) -> Result<(), Query> {
        match self.version {
            Some(current) if current != header.version() => {
                Err(Query::Error(pdu::ErrorReport::new(
                    header.version(),
                    pdu::err::UNEXPECTED_VERSION,
                    header.as_ref(),
                    "version switched during session"
                )))
            }
            Some(_) => Ok(()),
            None => {
                debug!(
                    "RTR: {} speaks protocol version {}",
                    self.peer, header.version()
                );
                self.version = Some(header.version());
                Ok(())
            }
        }
    }

    fn invalid_length(header: pdu::Header) -> Query {
        Query::Error(pdu::ErrorReport::new(
            header.version(),
            pdu::err::INVALID_REQUEST,
            header.as_ref(),
            "invalid length"
        ))
    }
}

/// # Sending
///
impl<Sock, Store> Connection<Sock, Store>
where
    Sock: AsyncWrite + Unpin + Sync + Send + 'static,
    Store: RoaSource
{
    async fn serial(&mut self, serial: Serial) -> Result<(), io::Error> {
        match self.store.diff(serial) {
            DiffResponse::Empty { session, serial } => {
                debug!(
                    "RTR: {} is current at serial {}", self.peer, serial
                );
                pdu::CacheResponse::new(
                    self.version(), session
                ).write(&mut self.sock).await?;
                self.end_of_data(session, serial).await
            }
            DiffResponse::Diff { session, serial, diff } => {
                debug!(
                    "RTR: sending diff to {}: {} announced, {} withdrawn",
                    self.peer, diff.announce.len(), diff.withdraw.len()
                );
                pdu::CacheResponse::new(
                    self.version(), session
                ).write(&mut self.sock).await?;
                for roa in &diff.announce {
                    pdu::Prefix::new(
                        self.version(), Action::Announce.into_flags(), *roa
                    ).write(&mut self.sock).await?;
                }
                for roa in &diff.withdraw {
                    pdu::Prefix::new(
                        self.version(), Action::Withdraw.into_flags(), *roa
                    ).write(&mut self.sock).await?;
                }
                self.end_of_data(session, serial).await
            }
            DiffResponse::Reset => {
                debug!(
                    "RTR: cannot serve serial {}, resetting {}",
                    serial, self.peer
                );
                pdu::CacheReset::new(
                    self.version()
                ).write(&mut self.sock).await
            }
        }
    }

    async fn reset(&mut self) -> Result<(), io::Error> {
        let snapshot = self.store.full();
        debug!(
            "RTR: sending full set of {} ROAs to {}",
            snapshot.roas.len(), self.peer
        );
        pdu::CacheResponse::new(
            self.version(), snapshot.session
        ).write(&mut self.sock).await?;
        for roa in snapshot.roas.iter() {
            pdu::Prefix::new(
                self.version(), Action::Announce.into_flags(), *roa
            ).write(&mut self.sock).await?;
        }
        self.end_of_data(snapshot.session, snapshot.serial).await
    }

    async fn end_of_data(
        &mut self, session: u16, serial: Serial
    ) -> Result<(), io::Error> {
        pdu::EndOfData::new(
            self.version(), session, serial, self.store.timing()
        ).write(&mut self.sock).await
    }

    async fn error(
        &mut self, report: pdu::ErrorReport
    ) -> Result<(), io::Error> {
        report.write(&mut self.sock).await
    }

    async fn notify(
        &mut self, update: SerialUpdate
    ) -> Result<(), io::Error> {
        debug!(
            "RTR: notifying {} of serial {}", self.peer, update.serial
        );
        pdu::SerialNotify::new(
            self.version(), update.session, update.serial
        ).write(&mut self.sock).await
    }
}


//------------ Query ---------------------------------------------------------

enum Query {
    Serial(Serial),
    Reset,
    Error(pdu::ErrorReport),
    Notify(SerialUpdate)
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use crate::payload::{Roa, RoaSet};
    use crate::pdu::{
        Header, ResetQuery, SerialQuery, VERSION_1, VERSION_2
    };
    use crate::store::Cache;

    const SESSION: u16 = 42;

    fn roa(prefix: &str, prefix_len: u8, max_len: u8, asn: u32) -> Roa {
        Roa::new(prefix.parse().unwrap(), prefix_len, max_len, asn)
    }

    fn cache_with(roas: Vec<Roa>) -> Cache {
        Cache::new(SESSION, RoaSet::from_raw(roas), Default::default())
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    /// Feeds `input` into a fresh session and returns everything the
    /// session wrote back before closing.
    async fn run_session(cache: Cache, input: Vec<u8>) -> Vec<u8> {
        let (mut client, server) = duplex(0x1_0000);
        let registry = Registry::new();
        let conn = Connection::new(
            server, peer(), registry.register(peer()), cache
        );
        let handle = tokio::spawn(conn.run());
        client.write_all(&input).await.unwrap();
        client.shutdown().await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let _ = handle.await.unwrap();
        response
    }

    /// Splits a response byte stream back into (header, body) frames.
    async fn parse_frames(mut bytes: &[u8]) -> Vec<(Header, Vec<u8>)> {
        let mut frames = Vec::new();
        loop {
            match pdu::read_pdu(&mut bytes).await {
                Ok(frame) => frames.push(frame),
                Err(DecodeError::Eof) => return frames,
                Err(err) => panic!("bad frame in response: {}", err),
            }
        }
    }

    #[tokio::test]
    async fn reset_query_sends_full_set() {
        let cache = cache_with(vec![
            roa("192.0.2.0", 24, 32, 64496),
            roa("2001:db8::", 32, 48, 64497),
        ]);
        let response = run_session(
            cache, ResetQuery::new(VERSION_1).as_ref().to_vec()
        ).await;
        let frames = parse_frames(&response).await;
        assert_eq!(frames.len(), 4);

        assert_eq!(frames[0].0.pdu(), pdu::CacheResponse::PDU);
        assert_eq!(frames[0].0.session(), SESSION);

        let mut types: Vec<u8> = frames[1..3].iter().map(|frame| {
            frame.0.pdu()
        }).collect();
        types.sort();
        assert_eq!(types, vec![pdu::Ipv4Prefix::PDU, pdu::Ipv6Prefix::PDU]);
        for frame in &frames[1..3] {
            // Announcements carry flag bit 0 set.
            assert_eq!(frame.1[0] & 1, 1);
        }

        assert_eq!(frames[3].0.pdu(), pdu::EndOfData::PDU);
        let bytes: Vec<u8> = frames[3].0.as_ref().iter().copied()
            .chain(frames[3].1.iter().copied()).collect();
        let end = pdu::EndOfData::read_from(&bytes).unwrap();
        assert_eq!(end.serial(), Serial::from(0));
        assert_eq!(end.session(), SESSION);
        assert_eq!(end.refresh(), 3600);
        assert_eq!(end.retry(), 600);
        assert_eq!(end.expire(), 7200);
    }

    #[tokio::test]
    async fn serial_query_at_current_is_empty() {
        let cache = cache_with(vec![roa("192.0.2.0", 24, 32, 64496)]);
        let response = run_session(
            cache,
            SerialQuery::new(
                VERSION_2, SESSION, Serial::from(0)
            ).as_ref().to_vec()
        ).await;
        let frames = parse_frames(&response).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0.pdu(), pdu::CacheResponse::PDU);
        assert_eq!(frames[0].0.version(), VERSION_2);
        assert_eq!(frames[1].0.pdu(), pdu::EndOfData::PDU);
    }

    #[tokio::test]
    async fn serial_query_one_behind_gets_the_diff() {
        let kept = roa("192.0.2.0", 24, 32, 64496);
        let withdrawn = roa("2001:db8::", 32, 48, 64497);
        let added = roa("198.51.100.0", 24, 24, 64498);
        let cache = cache_with(vec![kept, withdrawn]);
        cache.apply_update(RoaSet::from_raw(vec![kept, added]));

        let response = run_session(
            cache,
            SerialQuery::new(
                VERSION_1, SESSION, Serial::from(0)
            ).as_ref().to_vec()
        ).await;
        let frames = parse_frames(&response).await;
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].0.pdu(), pdu::CacheResponse::PDU);

        // One v4 announcement, then one v6 withdrawal.
        assert_eq!(frames[1].0.pdu(), pdu::Ipv4Prefix::PDU);
        assert_eq!(frames[1].1[0] & 1, 1);
        assert_eq!(frames[2].0.pdu(), pdu::Ipv6Prefix::PDU);
        assert_eq!(frames[2].1[0] & 1, 0);

        assert_eq!(frames[3].0.pdu(), pdu::EndOfData::PDU);
    }

    #[tokio::test]
    async fn stale_serial_query_gets_cache_reset() {
        let cache = cache_with(vec![roa("192.0.2.0", 24, 32, 64496)]);
        let response = run_session(
            cache,
            SerialQuery::new(
                VERSION_1, SESSION, Serial::from(17)
            ).as_ref().to_vec()
        ).await;
        let frames = parse_frames(&response).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.pdu(), pdu::CacheReset::PDU);
        assert_eq!(frames[0].0.length(), 8);
    }

    #[tokio::test]
    async fn version_switch_is_reported_and_closes() {
        let cache = cache_with(Vec::new());
        let mut input = ResetQuery::new(VERSION_1).as_ref().to_vec();
        input.extend_from_slice(
            SerialQuery::new(VERSION_2, SESSION, Serial::from(0)).as_ref()
        );
        let response = run_session(cache, input).await;
        let frames = parse_frames(&response).await;
        // Full (empty) exchange for the reset query, then the report.
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].0.pdu(), pdu::CacheResponse::PDU);
        assert_eq!(frames[1].0.pdu(), pdu::EndOfData::PDU);
        assert_eq!(frames[2].0.pdu(), pdu::ErrorReport::PDU);
        assert_eq!(frames[2].0.session(), pdu::err::UNEXPECTED_VERSION);
    }

    #[tokio::test]
    async fn unsupported_version_is_reported() {
        let cache = cache_with(Vec::new());
        let response = run_session(
            cache, ResetQuery::new(3).as_ref().to_vec()
        ).await;
        // The report echoes the offending version byte, so parse by hand.
        assert_eq!(response[0], 3);
        assert_eq!(response[1], pdu::ErrorReport::PDU);
        assert_eq!(
            u16::from_be_bytes([response[2], response[3]]),
            pdu::err::UNSUPPORTED_VERSION
        );
        // Total length covers the whole response.
        assert_eq!(
            u32::from_be_bytes([
                response[4], response[5], response[6], response[7]
            ]) as usize,
            response.len()
        );
    }

    #[tokio::test]
    async fn invalid_pdu_type_is_reported() {
        let cache = cache_with(Vec::new());
        let response = run_session(
            cache, Header::new(VERSION_1, 9, 0, 8).as_ref().to_vec()
        ).await;
        let frames = parse_frames(&response).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.pdu(), pdu::ErrorReport::PDU);
        assert_eq!(frames[0].0.session(), pdu::err::UNSUPPORTED_PDU_TYPE);
    }

    #[tokio::test]
    async fn unexpected_supported_type_is_reported() {
        let cache = cache_with(Vec::new());
        let response = run_session(
            cache,
            pdu::CacheResponse::new(VERSION_1, 0).as_ref().to_vec()
        ).await;
        let frames = parse_frames(&response).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.pdu(), pdu::ErrorReport::PDU);
        assert_eq!(frames[0].0.session(), pdu::err::UNSUPPORTED_PDU_TYPE);
    }

    #[tokio::test]
    async fn malformed_length_closes_the_session() {
        let cache = cache_with(Vec::new());
        let response = run_session(
            cache, Header::new(VERSION_1, 2, 0, 4).as_ref().to_vec()
        ).await;
        let frames = parse_frames(&response).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.pdu(), pdu::ErrorReport::PDU);
        assert_eq!(frames[0].0.session(), pdu::err::CORRUPT_DATA);
    }

    #[tokio::test]
    async fn wrong_length_for_known_type_is_reported() {
        let cache = cache_with(Vec::new());
        // A reset query padded out to twelve bytes.
        let mut input = Header::new(VERSION_1, 2, 0, 12).as_ref().to_vec();
        input.extend_from_slice(&[0, 0, 0, 0]);
        let response = run_session(cache, input).await;
        let frames = parse_frames(&response).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.pdu(), pdu::ErrorReport::PDU);
        assert_eq!(frames[0].0.session(), pdu::err::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn serial_notify_from_client_is_ignored() {
        let cache = cache_with(Vec::new());
        let response = run_session(
            cache,
            pdu::SerialNotify::new(
                VERSION_1, SESSION, Serial::from(9)
            ).as_ref().to_vec()
        ).await;
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn registry_notify_pushes_serial_notify() {
        let cache = cache_with(vec![roa("192.0.2.0", 24, 32, 64496)]);
        let (mut client, server) = duplex(0x1_0000);
        let registry = Registry::new();
        let receiver = registry.register(peer());
        let handle = tokio::spawn(
            Connection::new(server, peer(), receiver, cache).run()
        );

        registry.notify_all(SerialUpdate {
            session: SESSION,
            serial: Serial::from(3),
        });
        let mut buf = [0u8; 12];
        client.read_exact(&mut buf).await.unwrap();
        let notify = pdu::SerialNotify::read_from(&buf).unwrap();
        assert_eq!(notify.session(), SESSION);
        assert_eq!(notify.serial(), Serial::from(3));

        drop(client);
        let _ = handle.await;
    }
}
