//! Ketama-style consistent hash locator (spec.md §4.6).
//!
//! Built once from the node endpoint list. Each node gets 160 points on
//! a 32-bit ring (4 words from each of 40 MD5 digests of
//! `"{endpoint}-{i}"`). `locate` hashes the key with MD5, takes the
//! first 4 bytes as the key's ring position, and walks forward from the
//! first point ≥ that position (wrapping), skipping nodes already
//! chosen, until `replicas + 1` distinct nodes are collected.

use md5::{Digest, Md5};

use crate::locator::{Locator, Selection};
use crate::request::Request;

const POINTS_PER_NODE_ROUND: usize = 40;

pub struct KetamaLocator {
    /// Sorted by ring position.
    ring: Vec<(u32, usize)>,
}

fn words_le(digest: &[u8]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (i, word) in words.iter_mut().enumerate() {
        let base = i * 4;
        *word = u32::from_le_bytes([
            digest[base],
            digest[base + 1],
            digest[base + 2],
            digest[base + 3],
        ]);
    }
    words
}

impl KetamaLocator {
    pub fn new(endpoints: &[String]) -> Self {
        let mut ring = Vec::with_capacity(endpoints.len() * POINTS_PER_NODE_ROUND * 4);
        for (node_index, endpoint) in endpoints.iter().enumerate() {
            for i in 0..POINTS_PER_NODE_ROUND {
                let mut hasher = Md5::new();
                hasher.update(format!("{}-{}", endpoint, i).as_bytes());
                let digest = hasher.finalize();
                for point in words_le(&digest) {
                    ring.push((point, node_index));
                }
            }
        }
        ring.sort_unstable_by_key(|(point, _)| *point);
        KetamaLocator { ring }
    }

    fn key_position(key: &[u8]) -> u32 {
        let mut hasher = Md5::new();
        hasher.update(key);
        let digest = hasher.finalize();
        u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    fn ring_start(&self, position: u32) -> usize {
        match self.ring.binary_search_by_key(&position, |(point, _)| *point) {
            Ok(index) => index,
            Err(index) => {
                if index == self.ring.len() {
                    0
                } else {
                    index
                }
            }
        }
    }
}

impl Locator for KetamaLocator {
    fn locate(&self, key: &[u8], _request: &dyn Request, replicas: u8) -> Selection {
        if self.ring.is_empty() {
            return Vec::new();
        }
        let wanted = replicas as usize + 1;
        let position = Self::key_position(key);
        let start = self.ring_start(position);

        let mut selected = Vec::with_capacity(wanted);
        for step in 0..self.ring.len() {
            let (_, node_index) = self.ring[(start + step) % self.ring.len()];
            if !selected.contains(&node_index) {
                selected.push(node_index);
                if selected.len() == wanted {
                    break;
                }
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ReplicationPolicy, SimpleRequest};

    fn request() -> SimpleRequest {
        SimpleRequest::new(
            crate::protocol::Opcode::GET,
            b"k".to_vec(),
            vec![],
            vec![],
            1,
            0,
            ReplicationPolicy::AnyOk,
            |_r| {},
        )
    }

    #[test]
    fn ring_has_160_points_per_node() {
        let locator = KetamaLocator::new(&["a:1".into(), "b:2".into(), "c:3".into()]);
        assert_eq!(locator.ring.len(), 3 * 160);
    }

    #[test]
    fn locate_is_deterministic_for_same_key() {
        let locator = KetamaLocator::new(&["a:1".into(), "b:2".into(), "c:3".into()]);
        let req = request();
        let first = locator.locate(b"some-key", &req, 0);
        let second = locator.locate(b"some-key", &req, 0);
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn replication_walks_forward_to_distinct_nodes() {
        let locator = KetamaLocator::new(&["a:1".into(), "b:2".into(), "c:3".into()]);
        let req = request();
        let picks = locator.locate(b"some-key", &req, 2);
        assert_eq!(picks.len(), 3);
        let mut sorted = picks.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 3, "replicas must be distinct nodes: {:?}", picks);
    }

    #[test]
    fn single_node_ring_always_resolves_to_it() {
        let locator = KetamaLocator::new(&["only:1".into()]);
        let req = request();
        for key in ["a", "b", "c", "xyz"] {
            assert_eq!(locator.locate(key.as_bytes(), &req, 0), vec![0]);
        }
    }
}
