//! Serial numbers of cache revisions.
//!
//! Serials are 32 bit integers that wrap around at the top, see RFC 1982.
//! The cache only ever needs to step forward by one and look back by one,
//! so this type limits itself to wrapping increment and decrement plus the
//! conversions needed to put a serial on the wire.

use std::fmt;


//------------ Serial --------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Serial(u32);

impl Serial {
    pub fn from_be(value: u32) -> Self {
        Serial(u32::from_be(value))
    }

    pub fn to_be(self) -> u32 {
        self.0.to_be()
    }

    /// Returns the serial following this one, wrapping at `u32::MAX`.
    pub fn next(self) -> Self {
        Serial(self.0.wrapping_add(1))
    }

    /// Returns the serial preceding this one, wrapping at zero.
    pub fn previous(self) -> Self {
        Serial(self.0.wrapping_sub(1))
    }
}


//--- From

impl From<u32> for Serial {
    fn from(value: u32) -> Self {
        Serial(value)
    }
}

impl From<Serial> for u32 {
    fn from(serial: Serial) -> Self {
        serial.0
    }
}


//--- PartialEq

impl PartialEq<u32> for Serial {
    fn eq(&self, other: &u32) -> bool {
        self.0 == *other
    }
}


//--- Display

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}


//============ Tests =========================================================
