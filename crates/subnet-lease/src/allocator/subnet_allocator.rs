//! Candidate subnet allocator
//!
//! Tracks which grid subnets are taken and walks the gaps between them.
//! Uses a BTreeMap keyed by subnet base address for ordered O(log n) lookups.

use crate::config::NetworkConfig;
use crate::ip::{self, IpFamily};
use crate::lease::Lease;
use ipnet::IpNet;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;

/// How many free subnets to consider when picking one at random
pub const DEFAULT_MAX_CANDIDATES: usize = 100;

/// Free-subnet finder for one network config
#[derive(Debug, Clone)]
pub struct SubnetAllocator {
    family: IpFamily,
    subnet_len: u8,
    /// Addresses per subnet
    size: u128,
    /// Base address of the first leasable subnet
    first: u128,
    /// Base address of the last leasable subnet
    last: u128,
    /// Taken subnets keyed by base address
    taken: BTreeMap<u128, IpNet>,
}

impl SubnetAllocator {
    /// Create an allocator with nothing taken
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            family: config.family(),
            subnet_len: config.subnet_len(),
            size: config.subnet_size(),
            first: ip::addr_to_u128(config.subnet_min()),
            last: ip::addr_to_u128(config.subnet_max()),
            taken: BTreeMap::new(),
        }
    }

    /// Create an allocator with the given leases marked as taken
    pub fn with_leases<'a>(
        config: &NetworkConfig,
        leases: impl IntoIterator<Item = &'a Lease>,
    ) -> Self {
        let mut allocator = Self::new(config);
        for lease in leases {
            allocator.mark_taken(lease.subnet);
        }
        allocator
    }

    /// Total number of leasable subnets
    pub fn capacity(&self) -> u128 {
        (self.last - self.first) / self.size + 1
    }

    /// Number of subnets not taken
    pub fn available_count(&self) -> u128 {
        self.capacity() - self.taken.len() as u128
    }

    /// Base address of `subnet` if it is a leasable grid subnet
    fn grid_key(&self, subnet: &IpNet) -> Option<u128> {
        if IpFamily::of_net(subnet) != self.family || subnet.prefix_len() != self.subnet_len {
            return None;
        }

        let key = ip::addr_to_u128(subnet.addr());
        let in_range = key >= self.first && key <= self.last;
        let aligned = in_range && (key - self.first) % self.size == 0;
        aligned.then_some(key)
    }

    fn subnet_at(&self, key: u128) -> Option<IpNet> {
        let addr = ip::addr_from_u128(self.family, key)?;
        IpNet::new(addr, self.subnet_len).ok()
    }

    /// Mark a subnet as taken
    ///
    /// Subnets outside the leasable grid are ignored and return `false`.
    pub fn mark_taken(&mut self, subnet: IpNet) -> bool {
        match self.grid_key(&subnet) {
            Some(key) => {
                self.taken.insert(key, subnet);
                true
            }
            None => false,
        }
    }

    /// Mark a subnet as free again
    pub fn release(&mut self, subnet: &IpNet) -> bool {
        self.grid_key(subnet)
            .map(|key| self.taken.remove(&key).is_some())
            .unwrap_or(false)
    }

    pub fn is_taken(&self, subnet: &IpNet) -> bool {
        self.grid_key(subnet)
            .map(|key| self.taken.contains_key(&key))
            .unwrap_or(false)
    }

    /// Up to `limit` free subnets in ascending order
    pub fn free_subnets(&self, limit: usize) -> Vec<IpNet> {
        let mut free = Vec::new();
        let mut taken = self.taken.keys().copied().peekable();
        let mut cursor = Some(self.first);

        while let Some(current) = cursor {
            if current > self.last || free.len() >= limit {
                break;
            }

            // Skip past taken blocks below the cursor
            while taken.next_if(|&key| key < current).is_some() {}

            if taken.next_if_eq(&current).is_none() {
                if let Some(subnet) = self.subnet_at(current) {
                    free.push(subnet);
                }
            }

            cursor = current.checked_add(self.size);
        }

        free
    }

    /// A random free subnet among the first `limit` candidates
    ///
    /// Randomizing spreads concurrent agents over different subnets so that
    /// they rarely race for the same one.
    pub fn pick(&self, limit: usize) -> Option<IpNet> {
        self.free_subnets(limit)
            .choose(&mut rand::thread_rng())
            .copied()
    }

    /// All taken subnets in ascending order
    pub fn taken_subnets(&self) -> Vec<IpNet> {
        self.taken.values().copied().collect()
    }
}
