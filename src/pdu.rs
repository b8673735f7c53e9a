//! RTR PDUs.
//!
//! This module contains types that represent the protocol data units of
//! RPKI-RTR in their wire representation. That is, these types can be
//! given to read and write operations as buffers. See section 5 of
//! RFC 6810 and RFC 8210. All multi-byte fields are big-endian and are
//! stored in network byte order in place, so a value's memory is exactly
//! its wire image.

use std::{fmt, io, mem, slice};
use std::marker::Unpin;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt
};
use crate::payload::Roa;
use crate::serial::Serial;


//------------ Protocol Constants --------------------------------------------

pub const VERSION_1: u8 = 1;
pub const VERSION_2: u8 = 2;

pub fn is_supported_version(version: u8) -> bool {
    version == VERSION_1 || version == VERSION_2
}

/// PDU types 0 through 10 are assigned, excluding 5 and 9 here: router
/// keys (9) are not served and 5 was never assigned.
fn is_valid_type(pdu: u8) -> bool {
    matches!(pdu, 0..=4 | 6..=8 | 10)
}

/// Nothing a router legitimately sends comes anywhere near this.
const MAX_PDU_LEN: u32 = 65536;

/// Error Report error codes, RFC 8210 section 12.4.
pub mod err {
    pub const CORRUPT_DATA: u16 = 0;
    pub const INVALID_REQUEST: u16 = 3;
    pub const UNSUPPORTED_VERSION: u16 = 4;
    pub const UNSUPPORTED_PDU_TYPE: u16 = 5;
    pub const UNEXPECTED_VERSION: u16 = 8;
}


//------------ Macro for Common Impls ----------------------------------------

macro_rules! common {
    ( $type:ident ) => {
        impl $type {
            pub async fn write<A: AsyncWrite + Unpin>(
                &self,
                a: &mut A
            ) -> Result<(), io::Error> {
                a.write_all(self.as_ref()).await
            }

            /// Re-creates a value from its exact wire image.
            pub fn read_from(bytes: &[u8]) -> Option<Self> {
                if bytes.len() != mem::size_of::<Self>() {
                    return None
                }
                let mut res = Self::default();
                res.as_mut().copy_from_slice(bytes);
                Some(res)
            }
        }

        impl AsRef<[u8]> for $type {
            fn as_ref(&self) -> &[u8] {
                unsafe {
                    slice::from_raw_parts(
                        self as *const Self as *const u8,
                        mem::size_of::<Self>()
                    )
                }
            }
        }

        impl AsMut<[u8]> for $type {
            fn as_mut(&mut self) -> &mut [u8] {
                unsafe {
                    slice::from_raw_parts_mut(
                        self as *mut Self as *mut u8,
                        mem::size_of::<Self>()
                    )
                }
            }
        }
    }
}

macro_rules! concrete {
    ( $type:ident ) => {
        common!($type);

        impl $type {
            pub fn version(&self) -> u8 {
                self.header.version()
            }

            pub fn session(&self) -> u16 {
                self.header.session()
            }
        }
    }
}


//------------ SerialNotify --------------------------------------------------

#[derive(Default)]
#[repr(packed)]
pub struct SerialNotify {
    header: Header,
    serial: u32,
}

impl SerialNotify {
    pub const PDU: u8 = 0;
    pub const LEN: u32 = 12;

    pub fn new(version: u8, session: u16, serial: Serial) -> Self {
        SerialNotify {
            header: Header::new(version, Self::PDU, session, Self::LEN),
            serial: serial.to_be(),
        }
    }

    pub fn serial(&self) -> Serial {
        Serial::from_be(self.serial)
    }
}

concrete!(SerialNotify);


//------------ SerialQuery ---------------------------------------------------

#[derive(Default)]
#[repr(packed)]
pub struct SerialQuery {
    header: Header,
    payload: SerialQueryPayload,
}

impl SerialQuery {
    pub const PDU: u8 = 1;
    pub const LEN: u32 = 12;

    pub fn new(version: u8, session: u16, serial: Serial) -> Self {
        SerialQuery {
            header: Header::new(version, Self::PDU, session, Self::LEN),
            payload: SerialQueryPayload::new(serial),
        }
    }

    pub fn serial(&self) -> Serial {
        self.payload.serial()
    }
}

concrete!(SerialQuery);


//------------ SerialQueryPayload --------------------------------------------

#[derive(Default)]
#[repr(packed)]
pub struct SerialQueryPayload {
    serial: u32
}

impl SerialQueryPayload {
    pub fn new(serial: Serial) -> Self {
        SerialQueryPayload {
            serial: serial.to_be()
        }
    }

    pub fn serial(&self) -> Serial {
        Serial::from_be(self.serial)
    }
}

common!(SerialQueryPayload);


//------------ ResetQuery ----------------------------------------------------

#[derive(Default)]
#[repr(packed)]
pub struct ResetQuery {
    #[allow(dead_code)]
    header: Header
}

impl ResetQuery {
    pub const PDU: u8 = 2;
    pub const LEN: u32 = 8;

    pub fn new(version: u8) -> Self {
        ResetQuery {
            header: Header::new(version, Self::PDU, 0, Self::LEN)
        }
    }
}

concrete!(ResetQuery);


//------------ CacheResponse -------------------------------------------------

#[derive(Default)]
#[repr(packed)]
pub struct CacheResponse {
    #[allow(dead_code)]
    header: Header
}

impl CacheResponse {
    pub const PDU: u8 = 3;
    pub const LEN: u32 = 8;

    pub fn new(version: u8, session: u16) -> Self {
        CacheResponse {
            header: Header::new(version, Self::PDU, session, Self::LEN)
        }
    }
}

concrete!(CacheResponse);


//------------ Ipv4Prefix ----------------------------------------------------

#[derive(Default)]
#[repr(packed)]
pub struct Ipv4Prefix {
    header: Header,
    flags: u8,
    prefix_len: u8,
    max_len: u8,
    zero: u8,
    prefix: u32,
    asn: u32
}

impl Ipv4Prefix {
    pub const PDU: u8 = 4;
    pub const LEN: u32 = 20;

    pub fn new(
        version: u8,
        flags: u8,
        prefix_len: u8,
        max_len: u8,
        prefix: Ipv4Addr,
        asn: u32
    ) -> Self {
        Ipv4Prefix {
            header: Header::new(version, Self::PDU, 0, Self::LEN),
            flags,
            prefix_len,
            max_len,
            zero: 0,
            prefix: u32::from(prefix).to_be(),
            asn: asn.to_be()
        }
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn max_len(&self) -> u8 {
        self.max_len
    }

    pub fn prefix(&self) -> Ipv4Addr {
        u32::from_be(self.prefix).into()
    }

    pub fn asn(&self) -> u32 {
        u32::from_be(self.asn)
    }
}

concrete!(Ipv4Prefix);


//------------ Ipv6Prefix ----------------------------------------------------

#[derive(Default)]
#[repr(packed)]
pub struct Ipv6Prefix {
    header: Header,
    flags: u8,
    prefix_len: u8,
    max_len: u8,
    zero: u8,
    prefix: u128,
    asn: u32,
}

impl Ipv6Prefix {
    pub const PDU: u8 = 6;
    pub const LEN: u32 = 32;

    pub fn new(
        version: u8,
        flags: u8,
        prefix_len: u8,
        max_len: u8,
        prefix: Ipv6Addr,
        asn: u32
    ) -> Self {
        Ipv6Prefix {
            header: Header::new(version, Self::PDU, 0, Self::LEN),
            flags,
            prefix_len,
            max_len,
            zero: 0,
            prefix: u128::from(prefix).to_be(),
            asn: asn.to_be()
        }
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn max_len(&self) -> u8 {
        self.max_len
    }

    pub fn prefix(&self) -> Ipv6Addr {
        u128::from_be(self.prefix).into()
    }

    pub fn asn(&self) -> u32 {
        u32::from_be(self.asn)
    }
}

concrete!(Ipv6Prefix);


//------------ Prefix --------------------------------------------------------

/// The wire form of a single ROA, either address family.
pub enum Prefix {
    V4(Ipv4Prefix),
    V6(Ipv6Prefix),
}

impl Prefix {
    pub fn new(version: u8, flags: u8, roa: Roa) -> Self {
        match roa {
            Roa::V4(roa) => {
                Prefix::V4(
                    Ipv4Prefix::new(
                        version,
                        flags,
                        roa.prefix_len,
                        roa.max_len,
                        roa.prefix,
                        roa.asn
                    )
                )
            }
            Roa::V6(roa) => {
                Prefix::V6(
                    Ipv6Prefix::new(
                        version,
                        flags,
                        roa.prefix_len,
                        roa.max_len,
                        roa.prefix,
                        roa.asn
                    )
                )
            }
        }
    }

    pub async fn write<A: AsyncWrite + Unpin>(
        &self,
        a: &mut A
    ) -> Result<(), io::Error> {
        a.write_all(self.as_ref()).await
    }
}

impl AsRef<[u8]> for Prefix {
    fn as_ref(&self) -> &[u8] {
        match *self {
            Prefix::V4(ref prefix) => prefix.as_ref(),
            Prefix::V6(ref prefix) => prefix.as_ref(),
        }
    }
}


//------------ EndOfData -----------------------------------------------------

/// The End-of-Data PDU.
///
/// Versions 1 and 2 share the layout carrying the timer values the cache
/// advises its clients to use.
#[derive(Default)]
#[repr(packed)]
pub struct EndOfData {
    header: Header,
    serial: u32,
    refresh: u32,
    retry: u32,
    expire: u32,
}

impl EndOfData {
    pub const PDU: u8 = 7;
    pub const LEN: u32 = 24;

    pub fn new(
        version: u8,
        session: u16,
        serial: Serial,
        timing: Timing,
    ) -> Self {
        EndOfData {
            header: Header::new(version, Self::PDU, session, Self::LEN),
            serial: serial.to_be(),
            refresh: timing.refresh.to_be(),
            retry: timing.retry.to_be(),
            expire: timing.expire.to_be(),
        }
    }

    pub fn serial(&self) -> Serial {
        Serial::from_be(self.serial)
    }

    pub fn refresh(&self) -> u32 {
        u32::from_be(self.refresh)
    }

    pub fn retry(&self) -> u32 {
        u32::from_be(self.retry)
    }

    pub fn expire(&self) -> u32 {
        u32::from_be(self.expire)
    }
}

concrete!(EndOfData);


//------------ CacheReset ----------------------------------------------------

#[derive(Default)]
#[repr(packed)]
pub struct CacheReset {
    #[allow(dead_code)]
    header: Header
}

impl CacheReset {
    pub const PDU: u8 = 8;
    pub const LEN: u32 = 8;

    pub fn new(version: u8) -> Self {
        CacheReset {
            header: Header::new(version, Self::PDU, 0, Self::LEN)
        }
    }
}

concrete!(CacheReset);


//------------ ErrorReport ---------------------------------------------------

/// The Error Report PDU.
///
/// Unlike the fixed-size PDUs this one carries a copy of the erroneous
/// PDU and a diagnostic text, both of runtime size and both preceded by a
/// 32 bit length field, so it is encoded into an owned buffer.
pub struct ErrorReport {
    buf: Vec<u8>,
}

impl ErrorReport {
    pub const PDU: u8 = 10;

    pub fn new(version: u8, code: u16, pdu: &[u8], text: &str) -> Self {
        let len = 16 + pdu.len() + text.len();
        let mut buf = Vec::with_capacity(len);
        buf.push(version);
        buf.push(Self::PDU);
        buf.extend_from_slice(&code.to_be_bytes());
        buf.extend_from_slice(&(len as u32).to_be_bytes());
        buf.extend_from_slice(&(pdu.len() as u32).to_be_bytes());
        buf.extend_from_slice(pdu);
        buf.extend_from_slice(&(text.len() as u32).to_be_bytes());
        buf.extend_from_slice(text.as_bytes());
        ErrorReport { buf }
    }

    pub fn code(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    pub async fn write<A: AsyncWrite + Unpin>(
        &self,
        a: &mut A
    ) -> Result<(), io::Error> {
        a.write_all(&self.buf).await
    }
}

impl AsRef<[u8]> for ErrorReport {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}


//------------ Header --------------------------------------------------------

#[derive(Clone, Copy, Default)]
#[repr(packed)]
pub struct Header {
    version: u8,
    pdu: u8,
    session: u16,
    length: u32,
}

impl Header {
    pub const LEN: usize = mem::size_of::<Self>();

    pub fn new(version: u8, pdu: u8, session: u16, length: u32) -> Self {
        Header {
            version,
            pdu,
            session: session.to_be(),
            length: length.to_be(),
        }
    }

    pub fn version(self) -> u8 {
        self.version
    }

    pub fn pdu(self) -> u8 {
        self.pdu
    }

    pub fn session(self) -> u16 {
        u16::from_be(self.session)
    }

    pub fn length(self) -> u32 {
        u32::from_be(self.length)
    }
}

common!(Header);

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Header")
            .field("version", &self.version())
            .field("pdu", &self.pdu())
            .field("session", &self.session())
            .field("length", &self.length())
            .finish()
    }
}


//------------ Timing --------------------------------------------------------

/// The timer values advised to clients in End-of-Data PDUs.
#[derive(Clone, Copy, Debug)]
pub struct Timing {
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            refresh: 3600,
            retry: 600,
            expire: 7200
        }
    }
}


//------------ DecodeError ---------------------------------------------------

/// The ways reading a PDU off the wire can fail.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The peer closed the connection at a PDU boundary.
    #[error("connection closed")]
    Eof,

    /// The peer closed the connection in the middle of a PDU.
    #[error("connection closed mid-PDU")]
    ShortRead,

    /// The length field cannot describe a PDU.
    #[error("malformed PDU length {0}")]
    MalformedLength(u32),

    /// The version byte is neither 1 nor 2.
    #[error("unsupported protocol version {}", .0.version())]
    UnsupportedVersion(Header),

    /// The type byte is not one this implementation accepts.
    #[error("invalid PDU type {}", .0.pdu())]
    InvalidType(Header),

    #[error("{0}")]
    Io(#[from] io::Error),
}


//------------ read_pdu ------------------------------------------------------

/// Reads one full PDU frame off `sock`.
///
/// Reads exactly eight header bytes, then exactly `length - 8` body bytes.
/// The header's version and type are checked here so a caller never sees a
/// frame it cannot interpret; the per-type length checks stay with the
/// caller, which knows which types it expects.
pub async fn read_pdu<Sock: AsyncRead + Unpin>(
    sock: &mut Sock
) -> Result<(Header, Vec<u8>), DecodeError> {
    let mut header = Header::default();
    if let Err(err) = sock.read_exact(header.as_mut()).await {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Err(DecodeError::Eof)
        }
        return Err(err.into())
    }
    if header.length() < Header::LEN as u32 || header.length() > MAX_PDU_LEN {
        return Err(DecodeError::MalformedLength(header.length()))
    }
    if !is_supported_version(header.version()) {
        return Err(DecodeError::UnsupportedVersion(header))
    }
    if !is_valid_type(header.pdu()) {
        return Err(DecodeError::InvalidType(header))
    }
    let mut body = vec![0u8; header.length() as usize - Header::LEN];
    if let Err(err) = sock.read_exact(&mut body).await {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Err(DecodeError::ShortRead)
        }
        return Err(err.into())
    }
    Ok((header, body))
}


//============ Tests =========================================================
