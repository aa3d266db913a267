//! Shared pool of preallocated payloads.

use rand::RngCore;

/// Read-only payload buffers shared by every session of a fleet.
#[derive(Debug, Clone, Default)]
pub struct PayloadPool {
    payloads: Vec<Vec<u8>>,
}

impl PayloadPool {
    pub fn new(payloads: Vec<Vec<u8>>) -> Self {
        Self { payloads }
    }

    /// `count` payloads of random bytes; payload `i` is `i` bytes long.
    pub fn random(count: usize) -> Self {
        let mut rng = rand::thread_rng();
        let payloads = (0..count)
            .map(|len| {
                let mut payload = vec![0u8; len];
                rng.fill_bytes(&mut payload);
                payload
            })
            .collect();
        Self { payloads }
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.payloads.get(index).map(Vec::as_slice)
    }

    /// Pseudo-random pick. An empty pool yields an empty payload.
    pub fn pick(&self) -> &[u8] {
        if self.payloads.is_empty() {
            return &[];
        }
        &self.payloads[fastrand::usize(..self.payloads.len())]
    }

    /// Length of the longest payload, used to size receive buffers.
    pub fn max_len(&self) -> usize {
        self.payloads.iter().map(Vec::len).max().unwrap_or(0)
    }
}
