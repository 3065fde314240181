//! IPv4 address space allocation.
//!
//! Every technology stack owns one reserved subnet. The [`AddressAllocator`]
//! maps stack names to subnets and refuses any reservation that would overlap
//! an existing one, so stacks running side by side never share addresses.
//! The [`AddressAssigner`] then hands out host addresses from a subnet in
//! order, starting at `.1`.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DeviceId, NodeId};

/// Errors raised by address allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid subnet `{0}`")]
    InvalidSubnet(String),

    #[error("subnet {subnet} for `{stack}` overlaps {existing} reserved for `{owner}`")]
    Overlap {
        stack: String,
        subnet: Subnet,
        owner: String,
        existing: Subnet,
    },

    #[error("stack `{0}` already has a reserved subnet")]
    DuplicateStack(String),

    #[error("no subnet reserved for stack `{0}`")]
    Unregistered(String),

    #[error("subnet {0} has no free host addresses left")]
    Exhausted(Subnet),
}

/// Shortest prefix a stack may reserve.
pub const MIN_PREFIX_LEN: u8 = 8;

/// An IPv4 network prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// Creates a subnet. The network address must have no host bits set and
    /// the prefix must lie in `MIN_PREFIX_LEN..=32`.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self, AddressError> {
        let subnet = Self {
            network,
            prefix_len,
        };
        if !(MIN_PREFIX_LEN..=32).contains(&prefix_len)
            || u32::from(network) & !subnet.mask_bits() != 0
        {
            return Err(AddressError::InvalidSubnet(format!("{network}/{prefix_len}")));
        }
        Ok(subnet)
    }

    /// Builds a subnet from octets, clearing any host bits.
    ///
    /// The prefix is clamped to `MIN_PREFIX_LEN..=32`.
    pub fn from_octets(octets: [u8; 4], prefix_len: u8) -> Self {
        let mut subnet = Self {
            network: Ipv4Addr::from(octets),
            prefix_len: prefix_len.clamp(MIN_PREFIX_LEN, 32),
        };
        subnet.network = Ipv4Addr::from(u32::from(subnet.network) & subnet.mask_bits());
        subnet
    }

    /// Network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Dotted netmask, e.g. `255.255.255.0`.
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    fn mask_bits(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix_len as u32)
        }
    }

    fn first(&self) -> u32 {
        u32::from(self.network)
    }

    fn last(&self) -> u32 {
        self.first() | !self.mask_bits()
    }

    /// Returns true if `addr` belongs to this subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask_bits() == self.first()
    }

    /// Returns true if the two subnets share any address.
    pub fn overlaps(&self, other: &Subnet) -> bool {
        self.first() <= other.last() && other.first() <= self.last()
    }

    /// Number of usable host addresses (network and broadcast excluded).
    pub fn host_count(&self) -> u32 {
        match self.prefix_len {
            32 => 1,
            31 => 2,
            len => ((1u64 << (32 - len as u32)) - 2).min(u32::MAX as u64) as u32,
        }
    }

    /// The `index`-th usable host address, 1-based.
    pub fn host(&self, index: u32) -> Option<Ipv4Addr> {
        if index == 0 || index > self.host_count() {
            return None;
        }
        let offset = if self.prefix_len >= 31 { index - 1 } else { index };
        Some(Ipv4Addr::from(self.first() + offset))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressError::InvalidSubnet(s.to_string());
        let (addr, len) = s.split_once('/').ok_or_else(invalid)?;
        let network = addr.trim().parse::<Ipv4Addr>().map_err(|_| invalid())?;
        let prefix_len = len.trim().parse::<u8>().map_err(|_| invalid())?;
        Subnet::new(network, prefix_len)
    }
}

impl TryFrom<String> for Subnet {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(value: Subnet) -> Self {
        value.to_string()
    }
}

/// Maps stack names to disjoint reserved subnets.
///
/// # Example
///
/// ```
/// use stackweave::address::{AddressAllocator, Subnet};
///
/// let mut alloc = AddressAllocator::new();
/// alloc.reserve("thz", "10.60.0.0/24".parse().unwrap()).unwrap();
/// assert!(alloc.reserve("other", "10.60.0.128/25".parse().unwrap()).is_err());
///
/// let subnet = alloc.allocate("thz").unwrap();
/// assert_eq!(subnet.to_string(), "10.60.0.0/24");
/// assert_eq!(alloc.allocate("thz").unwrap(), subnet);
/// ```
#[derive(Clone, Debug, Default)]
pub struct AddressAllocator {
    reservations: Vec<(String, Subnet)>,
}

impl AddressAllocator {
    /// Creates an allocator with no reservations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `subnet` for `stack`.
    ///
    /// Fails if the stack already has a reservation or the subnet overlaps any
    /// existing reservation.
    pub fn reserve(&mut self, stack: impl Into<String>, subnet: Subnet) -> Result<(), AddressError> {
        let stack = stack.into();
        if self.reservations.iter().any(|(name, _)| *name == stack) {
            return Err(AddressError::DuplicateStack(stack));
        }
        if let Some((owner, existing)) = self
            .reservations
            .iter()
            .find(|(_, existing)| existing.overlaps(&subnet))
        {
            return Err(AddressError::Overlap {
                stack,
                subnet,
                owner: owner.clone(),
                existing: *existing,
            });
        }
        tracing::debug!(%stack, %subnet, "reserved subnet");
        self.reservations.push((stack, subnet));
        Ok(())
    }

    /// Returns the subnet reserved for `stack`.
    ///
    /// Calling this for the same stack always yields the same subnet. Asking
    /// for an unregistered stack is a contract violation.
    pub fn allocate(&self, stack: &str) -> Result<Subnet, AddressError> {
        self.reservation(stack)
            .ok_or_else(|| AddressError::Unregistered(stack.to_string()))
    }

    fn reservation(&self, stack: &str) -> Option<Subnet> {
        self.reservations
            .iter()
            .find(|(name, _)| name == stack)
            .map(|(_, subnet)| *subnet)
    }

    /// Drops the reservation of `stack`, freeing its range for others.
    pub fn release(&mut self, stack: &str) -> Option<Subnet> {
        let index = self.reservations.iter().position(|(name, _)| name == stack)?;
        let (_, subnet) = self.reservations.remove(index);
        tracing::debug!(%stack, %subnet, "released subnet");
        Some(subnet)
    }

    /// Number of reservations.
    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    /// Returns true if nothing is reserved.
    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}

/// Hands out consecutive host addresses from one subnet.
#[derive(Clone, Debug)]
pub struct AddressAssigner {
    subnet: Subnet,
    next_host: u32,
}

impl AddressAssigner {
    /// Starts assigning from the first host of `subnet`.
    pub fn new(subnet: Subnet) -> Self {
        Self {
            subnet,
            next_host: 1,
        }
    }

    /// The subnet being assigned from.
    pub fn subnet(&self) -> Subnet {
        self.subnet
    }

    /// Returns the next free host address.
    pub fn next_address(&mut self) -> Result<Ipv4Addr, AddressError> {
        let addr = self
            .subnet
            .host(self.next_host)
            .ok_or(AddressError::Exhausted(self.subnet))?;
        self.next_host += 1;
        Ok(addr)
    }
}

/// An address bound to a node's device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub node: NodeId,
    pub device: DeviceId,
    pub address: Ipv4Addr,
    pub subnet: Subnet,
}
