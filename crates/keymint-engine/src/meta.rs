//! Persisted per-keychain state.
//!
//! `KeychainMeta` is the full record the store holds for one account:
//! the account keys, the used/fresh frontier per chain, the gap set,
//! the derivation cache and the address reverse index. Index accounting
//! lives here as pure methods; derivation itself is the engine's job.

use keymint_core::{Change, DerivationPath, Network, Scheme};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Version tag written into every persisted record.
pub const FORMAT_VERSION: u32 = 1;

/// Gap limit applied when a keychain is created without an explicit
/// lookahead (BIP-44 §6).
pub const DEFAULT_LOOKAHEAD: u32 = 20;

/// One cached derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Compressed public key, hex.
    pub public_key: String,
    /// Address encoded under the keychain's scheme and network.
    pub address: String,
    pub used: bool,
}

/// The full persisted state of one keychain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeychainMeta {
    pub format_version: u32,
    pub descriptor: String,
    pub scheme: Scheme,
    pub network: Network,
    pub lookahead: u32,
    /// Account xpub, standard version bytes.
    pub extended_public_key: String,
    /// Same key, SLIP-0132 version bytes for the scheme.
    pub slip32_extended_public_key: String,
    /// Child xpub at `…/0` (depth 4).
    pub external_chain_xpub: String,
    /// Child xpub at `…/1` (depth 4).
    pub internal_chain_xpub: String,
    pub max_consecutive_external_index: u32,
    pub max_consecutive_internal_index: u32,
    pub non_consecutive_external_indexes: BTreeSet<u32>,
    pub non_consecutive_internal_indexes: BTreeSet<u32>,
    /// Derivation cache, keyed by `change/index`.
    pub derivations: BTreeMap<DerivationPath, CacheEntry>,
    /// Reverse index: address (stored form) → path.
    pub address_index: HashMap<String, DerivationPath>,
}

impl KeychainMeta {
    /// Smallest index on the chain that is not used, i.e. the fresh
    /// frontier.
    pub fn max_consecutive(&self, change: Change) -> u32 {
        match change {
            Change::External => self.max_consecutive_external_index,
            Change::Internal => self.max_consecutive_internal_index,
        }
    }

    /// Used indexes strictly beyond the frontier (the gaps).
    pub fn non_consecutive(&self, change: Change) -> &BTreeSet<u32> {
        match change {
            Change::External => &self.non_consecutive_external_indexes,
            Change::Internal => &self.non_consecutive_internal_indexes,
        }
    }

    fn chain_state_mut(&mut self, change: Change) -> (&mut u32, &mut BTreeSet<u32>) {
        match change {
            Change::External => (
                &mut self.max_consecutive_external_index,
                &mut self.non_consecutive_external_indexes,
            ),
            Change::Internal => (
                &mut self.max_consecutive_internal_index,
                &mut self.non_consecutive_internal_indexes,
            ),
        }
    }

    /// Exclusive upper bound of the observable window:
    /// `max_consecutive + |gaps| + lookahead`.
    pub fn max_observable_index(&self, change: Change) -> u32 {
        self.max_consecutive(change) + self.non_consecutive(change).len() as u32 + self.lookahead
    }

    pub fn entry(&self, path: &DerivationPath) -> Option<&CacheEntry> {
        self.derivations.get(path)
    }

    /// Insert a derivation into the cache and the address reverse
    /// index. An existing entry keeps its `used` flag (the cache is a
    /// pure function of the key except for that flag).
    pub fn insert_derivation(&mut self, path: DerivationPath, public_key: String, address: String) {
        self.address_index.insert(address.clone(), path);
        self.derivations.entry(path).or_insert(CacheEntry {
            public_key,
            address,
            used: false,
        });
    }

    /// Resolve an address (stored form) back to its path.
    pub fn resolve_address(&self, address: &str) -> Option<DerivationPath> {
        self.address_index.get(address).copied()
    }

    /// Record that the address at `path` was seen on-chain.
    ///
    /// Advances the frontier when the path sits exactly on it, draining
    /// any gaps that become consecutive; opens a gap when the path is
    /// beyond it; does nothing when the index is already behind it.
    pub fn mark_used(&mut self, path: DerivationPath) {
        let (max, gaps) = self.chain_state_mut(path.change);
        if path.index == *max {
            *max += 1;
            while gaps.remove(&*max) {
                *max += 1;
            }
        } else if path.index > *max {
            gaps.insert(path.index);
        }

        if let Some(entry) = self.derivations.get_mut(&path) {
            entry.used = true;
        }
    }

    /// Whether the index on this chain has been marked used.
    pub fn is_used(&self, path: &DerivationPath) -> bool {
        self.entry(path).map(|e| e.used).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_meta() -> KeychainMeta {
        KeychainMeta {
            format_version: FORMAT_VERSION,
            descriptor: "test".into(),
            scheme: Scheme::Legacy,
            network: Network::BitcoinMainnet,
            lookahead: DEFAULT_LOOKAHEAD,
            extended_public_key: String::new(),
            slip32_extended_public_key: String::new(),
            external_chain_xpub: String::new(),
            internal_chain_xpub: String::new(),
            max_consecutive_external_index: 0,
            max_consecutive_internal_index: 0,
            non_consecutive_external_indexes: BTreeSet::new(),
            non_consecutive_internal_indexes: BTreeSet::new(),
            derivations: BTreeMap::new(),
            address_index: HashMap::new(),
        }
    }

    fn ext(index: u32) -> DerivationPath {
        DerivationPath::new(Change::External, index).unwrap()
    }

    #[test]
    fn fresh_meta_window() {
        let meta = empty_meta();
        assert_eq!(meta.max_consecutive(Change::External), 0);
        assert_eq!(meta.max_observable_index(Change::External), 20);
        assert_eq!(meta.max_observable_index(Change::Internal), 20);
    }

    #[test]
    fn consecutive_marks_advance_frontier() {
        let mut meta = empty_meta();
        meta.mark_used(ext(0));
        assert_eq!(meta.max_consecutive(Change::External), 1);
        assert_eq!(meta.max_observable_index(Change::External), 21);

        meta.mark_used(ext(1));
        assert_eq!(meta.max_consecutive(Change::External), 2);
        assert!(meta.non_consecutive(Change::External).is_empty());
    }

    #[test]
    fn gap_opens_and_closes() {
        let mut meta = empty_meta();

        // Mark index 3 only: frontier stays, one gap opens.
        meta.mark_used(ext(3));
        assert_eq!(meta.max_consecutive(Change::External), 0);
        assert_eq!(
            meta.non_consecutive(Change::External).iter().copied().collect::<Vec<_>>(),
            vec![3]
        );
        assert_eq!(meta.max_observable_index(Change::External), 21);

        // Fill 0, 1, 2: the frontier sweeps through the gap.
        meta.mark_used(ext(0));
        meta.mark_used(ext(1));
        meta.mark_used(ext(2));
        assert_eq!(meta.max_consecutive(Change::External), 4);
        assert!(meta.non_consecutive(Change::External).is_empty());
        assert_eq!(meta.max_observable_index(Change::External), 24);
    }

    #[test]
    fn closure_drains_multiple_gaps() {
        let mut meta = empty_meta();
        meta.mark_used(ext(1));
        meta.mark_used(ext(2));
        meta.mark_used(ext(4));
        assert_eq!(meta.max_consecutive(Change::External), 0);
        assert_eq!(meta.non_consecutive(Change::External).len(), 3);

        // Marking 0 closes 1 and 2 in the same sweep, but not 4.
        meta.mark_used(ext(0));
        assert_eq!(meta.max_consecutive(Change::External), 3);
        assert_eq!(
            meta.non_consecutive(Change::External).iter().copied().collect::<Vec<_>>(),
            vec![4]
        );
    }

    #[test]
    fn marking_is_idempotent() {
        let mut meta = empty_meta();
        meta.mark_used(ext(0));
        meta.mark_used(ext(5));
        let frontier = meta.max_consecutive(Change::External);
        let gaps = meta.non_consecutive(Change::External).clone();

        meta.mark_used(ext(0));
        meta.mark_used(ext(5));
        assert_eq!(meta.max_consecutive(Change::External), frontier);
        assert_eq!(meta.non_consecutive(Change::External), &gaps);
    }

    #[test]
    fn disjoint_marks_commute() {
        let mut forward = empty_meta();
        for i in [0u32, 7, 2, 9] {
            forward.mark_used(ext(i));
        }
        let mut backward = empty_meta();
        for i in [9u32, 2, 7, 0] {
            backward.mark_used(ext(i));
        }
        assert_eq!(
            forward.max_consecutive(Change::External),
            backward.max_consecutive(Change::External)
        );
        assert_eq!(
            forward.non_consecutive(Change::External),
            backward.non_consecutive(Change::External)
        );
    }

    #[test]
    fn chains_are_independent() {
        let mut meta = empty_meta();
        meta.mark_used(ext(0));
        meta.mark_used(DerivationPath::new(Change::Internal, 2).unwrap());

        assert_eq!(meta.max_consecutive(Change::External), 1);
        assert_eq!(meta.max_consecutive(Change::Internal), 0);
        assert_eq!(meta.non_consecutive(Change::External).len(), 0);
        assert_eq!(meta.non_consecutive(Change::Internal).len(), 1);
    }

    #[test]
    fn insert_derivation_keeps_used_flag() {
        let mut meta = empty_meta();
        meta.insert_derivation(ext(0), "02aa".into(), "addr0".into());
        meta.mark_used(ext(0));
        assert!(meta.is_used(&ext(0)));

        // Re-deriving the same path must not clear the flag.
        meta.insert_derivation(ext(0), "02aa".into(), "addr0".into());
        assert!(meta.is_used(&ext(0)));
    }

    #[test]
    fn serde_round_trip() {
        let mut meta = empty_meta();
        meta.insert_derivation(ext(0), "02aa".into(), "addr0".into());
        meta.mark_used(ext(0));
        meta.mark_used(ext(4));

        let json = serde_json::to_vec(&meta).unwrap();
        let back: KeychainMeta = serde_json::from_slice(&json).unwrap();

        assert_eq!(back.format_version, FORMAT_VERSION);
        assert_eq!(back.max_consecutive(Change::External), 1);
        assert_eq!(back.non_consecutive(Change::External).len(), 1);
        assert_eq!(back.resolve_address("addr0"), Some(ext(0)));
        assert!(back.is_used(&ext(0)));
    }
}
