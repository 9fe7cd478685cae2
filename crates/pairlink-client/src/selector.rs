//! Relay server selection.
//!
//! Each client is pinned to the reachable node whose hash is closest to the
//! hash of its public key, so both sides of a pairing can predict where the
//! other one lives.

use std::cmp::Ordering;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use pairlink_crypto::generic_hash;

use crate::error::SelectError;
use crate::relay::NodeProbe;

type Digest = [u8; 32];

/// Absolute difference of two 256-bit big-endian integers.
fn distance(a: &Digest, b: &Digest) -> Digest {
    let (hi, lo) = match a.cmp(b) {
        Ordering::Less => (b, a),
        _ => (a, b),
    };
    let mut out = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let mut d = hi[i] as i16 - lo[i] as i16 - borrow;
        if d < 0 {
            d += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = d as u8;
    }
    out
}

fn node_hash(node: &str, nonce: &[u8]) -> Digest {
    let mut input = Vec::with_capacity(node.len() + nonce.len());
    input.extend_from_slice(node.as_bytes());
    input.extend_from_slice(nonce);
    generic_hash(&input)
}

/// Pick the candidate whose `hash(node ++ nonce)` is closest to
/// `public_key_hash`. Ties keep the earlier candidate.
pub fn closest_node<'a>(
    candidates: &'a [String],
    public_key_hash: &Digest,
    nonce: &[u8],
) -> Option<&'a str> {
    let mut best: Option<(Digest, &'a str)> = None;
    for node in candidates {
        let d = distance(&node_hash(node, nonce), public_key_hash);
        match &best {
            Some((best_d, _)) if d >= *best_d => {}
            _ => best = Some((d, node.as_str())),
        }
    }
    best.map(|(_, node)| node)
}

#[derive(Debug, Clone)]
pub struct RelayServerSelector {
    probe_timeout: Duration,
}

impl RelayServerSelector {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Probe every candidate concurrently and keep the live ones, in order.
    pub async fn reachable<P: NodeProbe + ?Sized>(&self, probe: &P, candidates: &[String]) -> Vec<String> {
        let checks = candidates.iter().map(|node| async move {
            match tokio::time::timeout(self.probe_timeout, probe.is_up(node)).await {
                Ok(up) => up,
                Err(_) => {
                    debug!(node = %node, "relay probe timed out");
                    false
                }
            }
        });
        let results = join_all(checks).await;

        candidates
            .iter()
            .zip(results)
            .filter_map(|(node, up)| up.then(|| node.clone()))
            .collect()
    }

    pub async fn select<P: NodeProbe + ?Sized>(
        &self,
        probe: &P,
        candidates: &[String],
        public_key_hash: &Digest,
        nonce: &[u8],
    ) -> Result<String, SelectError> {
        let live = self.reachable(probe, candidates).await;
        if live.len() < candidates.len() {
            warn!(
                reachable = live.len(),
                configured = candidates.len(),
                "some relay nodes are unreachable"
            );
        }

        let node = closest_node(&live, public_key_hash, nonce)
            .ok_or(SelectError::NoAvailableRelay)?
            .to_string();
        info!(relay = %node, "relay server selected");
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;

    use super::*;

    struct StaticProbe {
        down: HashSet<String>,
        hang: HashSet<String>,
    }

    impl StaticProbe {
        fn all_up() -> Self {
            Self { down: HashSet::new(), hang: HashSet::new() }
        }
    }

    #[async_trait]
    impl NodeProbe for StaticProbe {
        async fn is_up(&self, node: &str) -> bool {
            if self.hang.contains(node) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            !self.down.contains(node)
        }
    }

    fn nodes() -> Vec<String> {
        (1..=5).map(|i| format!("relay-{}.example.org", i)).collect()
    }

    #[test]
    fn distance_is_symmetric_absolute_difference() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[31] = 10;
        b[31] = 3;
        let mut expected = [0u8; 32];
        expected[31] = 7;
        assert_eq!(distance(&a, &b), expected);
        assert_eq!(distance(&b, &a), expected);

        // borrow across bytes: 0x0100 - 0x00ff = 1
        let mut c = [0u8; 32];
        let mut d = [0u8; 32];
        c[30] = 1;
        d[31] = 0xff;
        let mut one = [0u8; 32];
        one[31] = 1;
        assert_eq!(distance(&c, &d), one);
        assert_eq!(distance(&a, &a), [0u8; 32]);
    }

    #[test]
    fn closest_node_is_deterministic() {
        let candidates = nodes();
        let hash = generic_hash(b"some public key");
        let first = closest_node(&candidates, &hash, &[]);
        assert!(first.is_some());
        for _ in 0..10 {
            assert_eq!(closest_node(&candidates, &hash, &[]), first);
        }
    }

    #[test]
    fn exact_match_wins() {
        let candidates = nodes();
        let hash = node_hash(&candidates[3], &[]);
        assert_eq!(closest_node(&candidates, &hash, &[]), Some(candidates[3].as_str()));

        let nonce = [1u8, 2, 3];
        let hash = node_hash(&candidates[1], &nonce);
        assert_eq!(closest_node(&candidates, &hash, &nonce), Some(candidates[1].as_str()));
    }

    #[test]
    fn ties_keep_earlier_candidate() {
        let candidates = vec!["same.example.org".to_string(), "same.example.org".to_string()];
        let hash = generic_hash(b"key");
        let chosen = closest_node(&candidates, &hash, &[]).unwrap();
        assert!(std::ptr::eq(chosen, candidates[0].as_str()));
    }

    #[test]
    fn empty_candidates() {
        assert_eq!(closest_node(&[], &[0u8; 32], &[]), None);
    }

    #[tokio::test]
    async fn two_clients_converge() {
        let selector = RelayServerSelector::new(Duration::from_millis(100));
        let probe = StaticProbe::all_up();
        let hash = generic_hash(b"wallet public key");

        let a = selector.select(&probe, &nodes(), &hash, &[]).await.unwrap();
        let b = selector.select(&probe, &nodes(), &hash, &[]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn unreachable_nodes_are_skipped() {
        let candidates = nodes();
        let hash = node_hash(&candidates[2], &[]);
        let probe = StaticProbe {
            down: [candidates[2].clone()].into_iter().collect(),
            hang: HashSet::new(),
        };
        let selector = RelayServerSelector::new(Duration::from_millis(100));
        let chosen = selector.select(&probe, &candidates, &hash, &[]).await.unwrap();
        assert_ne!(chosen, candidates[2]);
    }

    #[tokio::test]
    async fn probe_timeout_counts_as_down() {
        let candidates = nodes();
        let probe = StaticProbe {
            down: HashSet::new(),
            hang: [candidates[0].clone()].into_iter().collect(),
        };
        let selector = RelayServerSelector::new(Duration::from_millis(50));
        let live = selector.reachable(&probe, &candidates).await;
        assert_eq!(live, candidates[1..].to_vec());
    }

    #[tokio::test]
    async fn no_reachable_relay() {
        let candidates = nodes();
        let probe = StaticProbe {
            down: candidates.iter().cloned().collect(),
            hang: HashSet::new(),
        };
        let selector = RelayServerSelector::new(Duration::from_millis(50));
        let result = selector.select(&probe, &candidates, &[0u8; 32], &[]).await;
        assert!(matches!(result, Err(SelectError::NoAvailableRelay)));

        let result = selector.select(&probe, &[], &[0u8; 32], &[]).await;
        assert!(matches!(result, Err(SelectError::NoAvailableRelay)));
    }
}
