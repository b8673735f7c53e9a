//! The ROAs being transmitted via RTR.
//!
//! The types in here provide a more compact representation than the PDUs.
//! They also implement all the traits to use them as keys in collections to
//! be able to perform difference processing between cache revisions.

use std::collections::HashSet;
use std::collections::hash_set;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use log::warn;


//------------ Ipv4Roa -------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Ipv4Roa {
    pub prefix: Ipv4Addr,
    pub prefix_len: u8,
    pub max_len: u8,
    pub asn: u32
}


//------------ Ipv6Roa -------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Ipv6Roa {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub max_len: u8,
    pub asn: u32
}


//------------ Roa -----------------------------------------------------------

/// A route origin authorization for a single prefix.
///
/// Equality and hashing consider the prefix, the max length, and the ASN,
/// so two ROAs differing in any field are distinct set members.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Roa {
    V4(Ipv4Roa),
    V6(Ipv6Roa)
}

impl Roa {
    pub fn new(addr: IpAddr, prefix_len: u8, max_len: u8, asn: u32) -> Self {
        match addr {
            IpAddr::V4(prefix) => {
                Roa::V4(Ipv4Roa { prefix, prefix_len, max_len, asn })
            }
            IpAddr::V6(prefix) => {
                Roa::V6(Ipv6Roa { prefix, prefix_len, max_len, asn })
            }
        }
    }

    pub fn prefix_len(&self) -> u8 {
        match *self {
            Roa::V4(ref roa) => roa.prefix_len,
            Roa::V6(ref roa) => roa.prefix_len,
        }
    }

    pub fn max_len(&self) -> u8 {
        match *self {
            Roa::V4(ref roa) => roa.max_len,
            Roa::V6(ref roa) => roa.max_len,
        }
    }

    pub fn asn(&self) -> u32 {
        match *self {
            Roa::V4(ref roa) => roa.asn,
            Roa::V6(ref roa) => roa.asn,
        }
    }

    /// The largest prefix length the address family allows.
    pub fn family_max_len(&self) -> u8 {
        match *self {
            Roa::V4(_) => 32,
            Roa::V6(_) => 128,
        }
    }

    /// Checks the constraints of RFC 6482, section 3.3.
    ///
    /// The max length must be positive, must not be shorter than the
    /// prefix itself, and must fit the address family.
    pub fn is_valid(&self) -> bool {
        self.max_len() > 0
            && self.max_len() >= self.prefix_len()
            && self.max_len() <= self.family_max_len()
    }
}


//------------ RoaSet --------------------------------------------------------

/// The unique set of valid ROAs making up one cache revision.
///
/// Construction drops invalid and duplicate entries. Iteration order is
/// unspecified; consumers must not depend on it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RoaSet {
    roas: HashSet<Roa>,
}

impl RoaSet {
    /// Builds a set from a raw list, logging every rejection.
    pub fn from_raw(raw: Vec<Roa>) -> Self {
        let mut roas = HashSet::with_capacity(raw.len());
        for roa in raw {
            if !roa.is_valid() {
                warn!("dropping invalid ROA {:?}", roa);
                continue
            }
            if !roas.insert(roa) {
                warn!("dropping duplicate ROA {:?}", roa);
            }
        }
        RoaSet { roas }
    }

    pub fn len(&self) -> usize {
        self.roas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roas.is_empty()
    }

    pub fn contains(&self, roa: &Roa) -> bool {
        self.roas.contains(roa)
    }

    pub fn iter(&self) -> hash_set::Iter<Roa> {
        self.roas.iter()
    }
}


//------------ Action --------------------------------------------------------

/// Whether a prefix PDU announces or withdraws its ROA.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Action {
    Announce,
    Withdraw,
}

impl Action {
    pub fn from_flags(flags: u8) -> Self {
        if flags & 1 == 1 {
            Action::Announce
        }
        else {
            Action::Withdraw
        }
    }

    pub fn into_flags(self) -> u8 {
        match self {
            Action::Announce => 1,
            Action::Withdraw => 0
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(prefix: &str, prefix_len: u8, max_len: u8, asn: u32) -> Roa {
        Roa::new(prefix.parse().unwrap(), prefix_len, max_len, asn)
    }

    fn v6(prefix: &str, prefix_len: u8, max_len: u8, asn: u32) -> Roa {
        Roa::new(prefix.parse().unwrap(), prefix_len, max_len, asn)
    }

    #[test]
    fn validation() {
        assert!(v4("192.0.2.0", 24, 24, 64496).is_valid());
        assert!(v4("192.0.2.0", 24, 32, 64496).is_valid());
        assert!(v6("2001:db8::", 32, 48, 64496).is_valid());
        assert!(v6("2001:db8::", 48, 128, 64496).is_valid());

        // Zero max length.
        assert!(!v4("192.0.2.0", 0, 0, 64496).is_valid());

        // Max length shorter than the prefix.
        assert!(!v4("192.0.2.0", 24, 23, 64496).is_valid());

        // Max length beyond the address family.
        assert!(!v4("192.0.2.0", 24, 33, 64496).is_valid());
        assert!(!v6("2001:db8::", 32, 129, 64496).is_valid());
    }

    #[test]
    fn set_construction_drops_invalid_and_duplicates() {
        let set = RoaSet::from_raw(vec![
            v4("192.0.2.0", 24, 32, 64496),
            v4("192.0.2.0", 24, 32, 64496),     // duplicate
            v4("198.51.100.0", 24, 23, 64496),  // invalid
            v6("2001:db8::", 32, 48, 64496),
        ]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&v4("192.0.2.0", 24, 32, 64496)));
        assert!(set.contains(&v6("2001:db8::", 32, 48, 64496)));
        assert!(!set.contains(&v4("198.51.100.0", 24, 23, 64496)));
    }

    #[test]
    fn distinct_members() {
        // Differing in any one field makes a distinct set member.
        let set = RoaSet::from_raw(vec![
            v4("192.0.2.0", 24, 32, 64496),
            v4("192.0.2.0", 24, 31, 64496),
            v4("192.0.2.0", 24, 32, 64497),
        ]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn action_flags() {
        assert_eq!(Action::from_flags(1), Action::Announce);
        assert_eq!(Action::from_flags(0), Action::Withdraw);
        assert_eq!(Action::Announce.into_flags(), 1);
        assert_eq!(Action::Withdraw.into_flags(), 0);
    }
}
