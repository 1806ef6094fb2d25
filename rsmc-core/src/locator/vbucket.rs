//! VBucketServerMap locator (spec.md §4.6): the Couchbase-style
//! partitioned locator. Unlike Round-Robin and Ketama, this one mutates
//! the request — it writes the computed bucket into `request.vbucket`
//! before returning the selection, since downstream servers reject
//! requests whose embedded vbucket id doesn't match their ownership.

use crate::hash::vbucket_for;
use crate::locator::{Locator, Selection};
use crate::request::Request;

pub struct VBucketServerMap {
    /// `map[bucket]` lists the primary followed by up to `R` replicas as
    /// indices into the node list; `-1` means "no node assigned".
    map: Vec<Vec<i32>>,
}

impl VBucketServerMap {
    pub fn new(map: Vec<Vec<i32>>) -> Self {
        VBucketServerMap { map }
    }

    pub fn bucket_count(&self) -> usize {
        self.map.len()
    }
}

impl Locator for VBucketServerMap {
    fn locate(&self, key: &[u8], request: &dyn Request, replicas: u8) -> Selection {
        if self.map.is_empty() {
            return Vec::new();
        }
        let bucket = vbucket_for(key, self.map.len() as u32);
        request.set_vbucket(bucket as u16);

        let wanted = replicas as usize + 1;
        self.map[bucket as usize]
            .iter()
            .filter(|&&node| node >= 0)
            .take(wanted)
            .map(|&node| node as usize)
            .collect()
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
    fn example_from_spec_selects_node_one_of_three() {
        // spec.md §8 scenario 6: 3 nodes, 1024 buckets, map[i] = [i mod 3].
        let map: Vec<Vec<i32>> = (0..1024).map(|i| vec![(i % 3) as i32]).collect();
        let locator = VBucketServerMap::new(map);
        let req = request();
        let selection = locator.locate(b"XXXXX", &req, 0);
        assert_eq!(req.vbucket(), 133);
        assert_eq!(selection, vec![1]);
    }

    #[test]
    fn skips_unassigned_replicas() {
        // Every bucket row is [2, -1, 0, 1]: the -1 must never appear
        // in a selection, regardless of which bucket a key lands in.
        let map = vec![vec![2i32, -1, 0, 1]; 8];
        let locator = VBucketServerMap::new(map);
        let req = request();
        let selection = locator.locate(b"anykey", &req, 3);
        assert_eq!(selection, vec![2, 0, 1]);
    }

    #[test]
    fn replicas_bound_selection_length() {
        let map: Vec<Vec<i32>> = (0..16).map(|_| vec![0, 1, 2, 3]).collect();
        let locator = VBucketServerMap::new(map);
        let req = request();
        assert_eq!(locator.locate(b"k", &req, 0).len(), 1);
        assert_eq!(locator.locate(b"k", &req, 1).len(), 2);
        assert_eq!(locator.locate(b"k", &req, 3).len(), 4);
    }
}
