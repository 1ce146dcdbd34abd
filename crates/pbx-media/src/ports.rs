//! RTP/RTCP port-pair allocator.
//!
//! Modeled on the teacher's `rtp-core::transport` allocator, restricted to
//! the one pairing strategy the spec needs: adjacent even RTP / odd RTCP,
//! picked at random within `[min, max]` with collision avoidance against
//! whatever is already allocated. Sequential/random/muxed strategy
//! variants the teacher exposes aren't needed at this scale (§4.8, §9).

use std::collections::HashSet;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{MediaError, Result};

pub struct PortAllocator {
    min: u16,
    max: u16,
    allocated: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(min: u16, max: u16) -> Self {
        assert!(min < max, "RTP port range must be non-empty");
        Self { min: min & !1, max, allocated: Mutex::new(HashSet::new()) }
    }

    /// Allocate one RTP/RTCP pair: an even RTP port and the adjacent odd
    /// RTCP port, both currently free.
    pub fn allocate_pair(&self) -> Result<(u16, u16)> {
        let mut allocated = self.allocated.lock();
        let even_candidates: Vec<u16> = (self.min..self.max).step_by(2).filter(|p| p + 1 <= self.max).collect();
        if even_candidates.is_empty() {
            return Err(MediaError::PortsExhausted);
        }

        let start = rand::thread_rng().gen_range(0..even_candidates.len());
        for i in 0..even_candidates.len() {
            let rtp = even_candidates[(start + i) % even_candidates.len()];
            let rtcp = rtp + 1;
            if !allocated.contains(&rtp) && !allocated.contains(&rtcp) {
                allocated.insert(rtp);
                allocated.insert(rtcp);
                return Ok((rtp, rtcp));
            }
        }
        Err(MediaError::PortsExhausted)
    }

    pub fn release_pair(&self, rtp_port: u16) {
        let mut allocated = self.allocated.lock();
        allocated.remove(&rtp_port);
        allocated.remove(&(rtp_port + 1));
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_distinct_even_odd_pairs() {
        let allocator = PortAllocator::new(30000, 30010);
        let (rtp1, rtcp1) = allocator.allocate_pair().unwrap();
        let (rtp2, rtcp2) = allocator.allocate_pair().unwrap();
        assert_eq!(rtp1 % 2, 0);
        assert_eq!(rtcp1, rtp1 + 1);
        assert_ne!((rtp1, rtcp1), (rtp2, rtcp2));
    }

    #[test]
    fn release_returns_ports_to_the_pool() {
        let allocator = PortAllocator::new(30000, 30002);
        let (rtp, _) = allocator.allocate_pair().unwrap();
        assert!(allocator.allocate_pair().is_err());
        allocator.release_pair(rtp);
        assert!(allocator.allocate_pair().is_ok());
    }
}
