//! ip allocation for tunnel clients
//!
//! hands out the lowest free host address of the tunnel subnet. the network
//! address, the broadcast address and the server's own address are never
//! leased.
//!
//! a cursor walks the host range once; addresses released below it go to an
//! ordered free set. leasing and releasing never scan the subnet, so a /8
//! costs the same as a /24.

use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use thiserror::Error;

/// allocates client addresses from a single ipv4 subnet.
#[derive(Debug)]
pub struct IpAllocator {
    subnet: Ipv4Net,
    reserved: Ipv4Addr,
    leased: HashSet<Ipv4Addr>,
    /// host range, inclusive. empty when `first > last`.
    first: u32,
    last: u32,
    /// lowest host the cursor has not passed yet.
    next: u32,
    /// free hosts below `next`.
    freed: BTreeSet<u32>,
}

impl IpAllocator {
    /// `reserved` is the server's own address; it is excluded from leasing.
    pub fn new(subnet: Ipv4Net, reserved: Ipv4Addr) -> Self {
        let subnet = subnet.trunc();
        // hosts() already skips network and broadcast for prefixes below /31
        let mut hosts = subnet.hosts();
        let (first, last) = match hosts.next() {
            Some(first) => (first, hosts.next_back().unwrap_or(first)),
            None => (Ipv4Addr::from(1), Ipv4Addr::from(0)),
        };
        Self {
            subnet,
            reserved,
            leased: HashSet::new(),
            first: u32::from(first),
            last: u32::from(last),
            next: u32::from(first),
            freed: BTreeSet::new(),
        }
    }

    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    pub fn server_ip(&self) -> Ipv4Addr {
        self.reserved
    }

    /// lease the lowest free host address.
    pub fn lease(&mut self) -> Result<Ipv4Addr, LeaseError> {
        if let Some(raw) = self.freed.pop_first() {
            let ip = Ipv4Addr::from(raw);
            self.leased.insert(ip);
            return Ok(ip);
        }
        // skipped addresses are claimed or reserved; each is passed once
        while self.next <= self.last {
            let ip = Ipv4Addr::from(self.next);
            self.next += 1;
            if ip != self.reserved && self.leased.insert(ip) {
                return Ok(ip);
            }
        }
        Err(LeaseError::Exhausted(self.subnet))
    }

    /// lease a specific address if it is a free, leasable host.
    pub fn claim(&mut self, ip: Ipv4Addr) -> bool {
        if !self.is_leasable(ip) || !self.leased.insert(ip) {
            return false;
        }
        self.freed.remove(&u32::from(ip));
        true
    }

    /// return an address to the pool. releasing a free address is a no-op.
    pub fn release(&mut self, ip: Ipv4Addr) -> bool {
        if !self.leased.remove(&ip) {
            return false;
        }
        let raw = u32::from(ip);
        // above the cursor it is picked up when the cursor gets there
        if raw < self.next {
            self.freed.insert(raw);
        }
        true
    }

    pub fn is_leased(&self, ip: Ipv4Addr) -> bool {
        self.leased.contains(&ip)
    }

    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }

    /// number of addresses this subnet can hand out in total.
    pub fn capacity(&self) -> usize {
        if self.first > self.last {
            return 0;
        }
        let hosts = (self.last - self.first) as usize + 1;
        hosts - usize::from(self.in_range(self.reserved))
    }

    fn in_range(&self, ip: Ipv4Addr) -> bool {
        (self.first..=self.last).contains(&u32::from(ip))
    }

    fn is_leasable(&self, ip: Ipv4Addr) -> bool {
        self.in_range(ip) && ip != self.reserved
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("no free address left in {0}")]
    Exhausted(Ipv4Net),
}
