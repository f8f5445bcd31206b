//! Keymint engine — the per-account keychain state machine.
//!
//! Composes the codecs from `keymint-core` and a [`Store`] backend into
//! the service API: create a keychain from an account xpub, hand out
//! fresh addresses, record on-chain use, and enumerate the observable
//! window the wallet must monitor.
//!
//! Every mutation runs as a read-modify-write cycle against the store's
//! CAS `put`; a lost race is retried a bounded number of times before
//! `CONFLICT` surfaces. The new meta is validated against the keychain
//! invariants before the write, so an inconsistent record is never
//! persisted.

pub mod meta;

pub use meta::{CacheEntry, KeychainMeta, DEFAULT_LOOKAHEAD, FORMAT_VERSION};

use keymint_core::{address, Change, ChainParams, DerivationPath, ExtendedPubKey, Network, Scheme};
use keymint_store::{Store, StoreError};
use secp256k1::{Secp256k1, VerifyOnly};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many times a lost CAS race is retried before CONFLICT surfaces.
const CONFLICT_RETRIES: usize = 3;

/// Errors from engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Codec(#[from] keymint_core::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Address is not observable: {0}")]
    AddressNotObservable(String),

    #[error("Meta encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Where the account key comes from at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountSource {
    /// A serialized account-level extended public key (standard or
    /// SLIP-0132 version bytes).
    ExtendedPublicKey(String),
    /// Raw account material; the xpub is reconstructed at depth 3 with
    /// a hardened child number and a zero parent fingerprint.
    AccountMaterial {
        /// Compressed or uncompressed public key bytes.
        public_key: Vec<u8>,
        chain_code: [u8; 32],
        account_index: u32,
    },
}

/// Parameters for [`KeychainEngine::create_keychain`].
#[derive(Debug, Clone)]
pub struct CreateKeychain {
    pub descriptor: String,
    pub source: AccountSource,
    pub scheme: Scheme,
    pub network: Network,
    /// Gap limit; defaults to [`DEFAULT_LOOKAHEAD`].
    pub lookahead: Option<u32>,
}

/// Public view of a keychain record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeychainInfo {
    pub descriptor: String,
    pub extended_public_key: String,
    pub slip32_extended_public_key: String,
    pub external_xpub: String,
    pub internal_xpub: String,
    pub max_consecutive_external_index: u32,
    pub max_consecutive_internal_index: u32,
    pub non_consecutive_external_indexes: Vec<u32>,
    pub non_consecutive_internal_indexes: Vec<u32>,
    pub lookahead_size: u32,
    pub scheme: Scheme,
    pub network: Network,
}

impl From<&KeychainMeta> for KeychainInfo {
    fn from(meta: &KeychainMeta) -> Self {
        KeychainInfo {
            descriptor: meta.descriptor.clone(),
            extended_public_key: meta.extended_public_key.clone(),
            slip32_extended_public_key: meta.slip32_extended_public_key.clone(),
            external_xpub: meta.external_chain_xpub.clone(),
            internal_xpub: meta.internal_chain_xpub.clone(),
            max_consecutive_external_index: meta.max_consecutive_external_index,
            max_consecutive_internal_index: meta.max_consecutive_internal_index,
            non_consecutive_external_indexes: meta
                .non_consecutive_external_indexes
                .iter()
                .copied()
                .collect(),
            non_consecutive_internal_indexes: meta
                .non_consecutive_internal_indexes
                .iter()
                .copied()
                .collect(),
            lookahead_size: meta.lookahead,
            scheme: meta.scheme,
            network: meta.network,
        }
    }
}

/// An address together with the path it was derived at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    pub derivation_path: DerivationPath,
    pub change: Change,
}

/// The account keys in both serializations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountExtendedKeys {
    pub extended_public_key: String,
    pub slip32_extended_public_key: String,
}

/// The keychain service, generic over its store backend.
pub struct KeychainEngine<S> {
    store: S,
    secp: Secp256k1<VerifyOnly>,
}

impl<S: Store> KeychainEngine<S> {
    pub fn new(store: S) -> Self {
        KeychainEngine {
            store,
            secp: Secp256k1::verification_only(),
        }
    }

    /// Create and persist a keychain record.
    ///
    /// Derives the two chain-level xpubs, pre-extends the observable
    /// window to `[0, lookahead)` on both chains, and inserts the
    /// record; a descriptor collision fails with `ALREADY_EXISTS`.
    pub fn create_keychain(&self, request: CreateKeychain) -> Result<KeychainInfo, EngineError> {
        let params = ChainParams::for_network(request.network);

        let account = match &request.source {
            AccountSource::ExtendedPublicKey(encoded) => {
                ExtendedPubKey::from_base58(encoded, params)?
            }
            AccountSource::AccountMaterial {
                public_key,
                chain_code,
                account_index,
            } => ExtendedPubKey::from_account_material(public_key, *chain_code, *account_index)?,
        };

        let external = account.ckd_pub(&self.secp, Change::External.child_index())?;
        let internal = account.ckd_pub(&self.secp, Change::Internal.child_index())?;

        let mut meta = KeychainMeta {
            format_version: FORMAT_VERSION,
            descriptor: request.descriptor.clone(),
            scheme: request.scheme,
            network: request.network,
            lookahead: request.lookahead.unwrap_or(DEFAULT_LOOKAHEAD),
            extended_public_key: account.to_base58(params.bip32_pub_version),
            slip32_extended_public_key: account
                .to_base58(params.slip132_version(request.scheme)),
            external_chain_xpub: external.to_base58(params.bip32_pub_version),
            internal_chain_xpub: internal.to_base58(params.bip32_pub_version),
            max_consecutive_external_index: 0,
            max_consecutive_internal_index: 0,
            non_consecutive_external_indexes: Default::default(),
            non_consecutive_internal_indexes: Default::default(),
            derivations: Default::default(),
            address_index: Default::default(),
        };

        self.extend_observable_window(&mut meta)?;
        self.check_invariants(&meta)?;

        self.store
            .create(&request.descriptor, &serde_json::to_vec(&meta)?)?;
        log::info!(
            "Created keychain {} ({} / {})",
            request.descriptor,
            meta.scheme,
            meta.network
        );
        Ok(KeychainInfo::from(&meta))
    }

    /// The next `count` never-used addresses on a chain, starting at
    /// the fresh frontier. Read-only and idempotent: without new marks,
    /// repeated calls return the same sequence.
    pub fn get_fresh_addresses(
        &self,
        descriptor: &str,
        change: Change,
        count: u32,
    ) -> Result<Vec<AddressInfo>, EngineError> {
        let meta = self.load(descriptor)?;
        let base = meta.max_consecutive(change);

        let mut addresses = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let path = DerivationPath::new(change, base.saturating_add(offset))?;
            let address = match meta.entry(&path) {
                Some(entry) => entry.address.clone(),
                // Beyond the cached window: derive on the fly, nothing
                // is persisted (the cache is pure in the key and path).
                None => self.derive_path(&meta, path)?.1,
            };
            addresses.push(AddressInfo {
                address,
                derivation_path: path,
                change,
            });
        }
        Ok(addresses)
    }

    /// Record on-chain use of a path.
    pub fn mark_path_as_used(
        &self,
        descriptor: &str,
        path: DerivationPath,
    ) -> Result<KeychainInfo, EngineError> {
        let meta = self.update(descriptor, |engine, meta| {
            engine.ensure_entry(meta, path)?;
            meta.mark_used(path);
            Ok(())
        })?;
        Ok(KeychainInfo::from(&meta))
    }

    /// Resolve addresses through the reverse index and mark their paths
    /// used. Any address outside the observable window fails the whole
    /// operation with `ADDRESS_NOT_OBSERVABLE`; nothing is persisted in
    /// that case.
    pub fn mark_addresses_as_used(
        &self,
        descriptor: &str,
        addresses: &[String],
    ) -> Result<KeychainInfo, EngineError> {
        let meta = self.update(descriptor, |_, meta| {
            let mut paths = Vec::with_capacity(addresses.len());
            for raw in addresses {
                let stored = address::normalize(raw);
                let path = meta
                    .resolve_address(&stored)
                    .ok_or_else(|| EngineError::AddressNotObservable(raw.clone()))?;
                paths.push(path);
            }
            for path in paths {
                meta.mark_used(path);
            }
            Ok(())
        })?;
        Ok(KeychainInfo::from(&meta))
    }

    /// Observable addresses on a chain with indexes in `[from, to]`;
    /// `to` is clipped to the end of the window.
    pub fn get_all_observable_addresses(
        &self,
        descriptor: &str,
        change: Change,
        from: u32,
        to: u32,
    ) -> Result<Vec<AddressInfo>, EngineError> {
        let meta = self.load(descriptor)?;
        let mut addresses = Vec::new();
        for index in self.observable_range(&meta, change, from, to) {
            let path = DerivationPath::new(change, index)?;
            // An index the derivation skipped (invalid child) has no
            // entry and is not enumerable.
            if let Some(entry) = meta.entry(&path) {
                addresses.push(AddressInfo {
                    address: entry.address.clone(),
                    derivation_path: path,
                    change,
                });
            }
        }
        Ok(addresses)
    }

    /// Same as [`Self::get_all_observable_addresses`], indexes only.
    pub fn get_all_observable_indexes(
        &self,
        descriptor: &str,
        change: Change,
        from: u32,
        to: u32,
    ) -> Result<Vec<u32>, EngineError> {
        let meta = self.load(descriptor)?;
        let mut indexes = Vec::new();
        for index in self.observable_range(&meta, change, from, to) {
            let path = DerivationPath::new(change, index)?;
            if meta.entry(&path).is_some() {
                indexes.push(index);
            }
        }
        Ok(indexes)
    }

    /// Exclusive upper bound of the observable window on a chain.
    pub fn get_max_observable_index(
        &self,
        descriptor: &str,
        change: Change,
    ) -> Result<u32, EngineError> {
        Ok(self.load(descriptor)?.max_observable_index(change))
    }

    /// The account key in both serializations.
    pub fn get_account_extended_key(
        &self,
        descriptor: &str,
    ) -> Result<AccountExtendedKeys, EngineError> {
        let meta = self.load(descriptor)?;
        Ok(AccountExtendedKeys {
            extended_public_key: meta.extended_public_key,
            slip32_extended_public_key: meta.slip32_extended_public_key,
        })
    }

    pub fn get_keychain_info(&self, descriptor: &str) -> Result<KeychainInfo, EngineError> {
        Ok(KeychainInfo::from(&self.load(descriptor)?))
    }

    pub fn delete_keychain(&self, descriptor: &str) -> Result<(), EngineError> {
        self.store.delete(descriptor)?;
        log::info!("Deleted keychain {descriptor}");
        Ok(())
    }

    // ─── internals ──────────────────────────────────────────────────

    fn load(&self, descriptor: &str) -> Result<KeychainMeta, EngineError> {
        let record = self.store.get(descriptor)?;
        decode_meta(descriptor, &record.data)
    }

    /// Read-modify-write cycle with bounded CONFLICT retries. The
    /// window extension and the invariant check run after `apply`, so a
    /// record that fails validation is never written.
    fn update<F>(&self, descriptor: &str, mut apply: F) -> Result<KeychainMeta, EngineError>
    where
        F: FnMut(&Self, &mut KeychainMeta) -> Result<(), EngineError>,
    {
        let mut attempt = 0;
        loop {
            let record = self.store.get(descriptor)?;
            let mut meta = decode_meta(descriptor, &record.data)?;

            apply(self, &mut meta)?;
            self.extend_observable_window(&mut meta)?;
            self.check_invariants(&meta)?;

            match self
                .store
                .put(descriptor, &serde_json::to_vec(&meta)?, record.version)
            {
                Ok(_) => return Ok(meta),
                Err(StoreError::Conflict(_)) if attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    log::debug!(
                        "CAS conflict on {descriptor}, retrying ({attempt}/{CONFLICT_RETRIES})"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Derive the public key and address at `path` without touching the
    /// cache.
    fn derive_path(
        &self,
        meta: &KeychainMeta,
        path: DerivationPath,
    ) -> Result<(String, String), EngineError> {
        let params = ChainParams::for_network(meta.network);
        let chain_xpub = self.chain_xpub(meta, path.change)?;
        let child = chain_xpub.ckd_pub(&self.secp, path.index)?;
        let encoded = address::encode(&child.public_key, meta.scheme, params);
        Ok((hex::encode(child.public_key.serialize()), encoded))
    }

    fn chain_xpub(&self, meta: &KeychainMeta, change: Change) -> Result<ExtendedPubKey, EngineError> {
        let params = ChainParams::for_network(meta.network);
        let encoded = match change {
            Change::External => &meta.external_chain_xpub,
            Change::Internal => &meta.internal_chain_xpub,
        };
        Ok(ExtendedPubKey::from_base58(encoded, params)?)
    }

    /// Make sure a single path has a cache entry (used by path-level
    /// marks, which may target an index beyond the current window).
    fn ensure_entry(&self, meta: &mut KeychainMeta, path: DerivationPath) -> Result<(), EngineError> {
        if meta.entry(&path).is_some() {
            return Ok(());
        }
        let (public_key, encoded) = self.derive_path(meta, path)?;
        meta.insert_derivation(path, public_key, encoded);
        Ok(())
    }

    /// Fill the derivation cache and address index up to the end of the
    /// observable window on both chains.
    fn extend_observable_window(&self, meta: &mut KeychainMeta) -> Result<(), EngineError> {
        let params = ChainParams::for_network(meta.network);
        for change in [Change::External, Change::Internal] {
            let window_end = meta.max_observable_index(change);
            let chain_xpub = self.chain_xpub(meta, change)?;
            for index in 0..window_end {
                let path = DerivationPath::new(change, index)?;
                if meta.entry(&path).is_some() {
                    continue;
                }
                let child = match chain_xpub.ckd_pub(&self.secp, index) {
                    Ok(child) => child,
                    // BIP-32 prescribes skipping such indexes.
                    Err(keymint_core::Error::InvalidDerivation(_)) => {
                        log::warn!(
                            "Skipping underivable index {change}/{index} on {}",
                            meta.descriptor
                        );
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let encoded = address::encode(&child.public_key, meta.scheme, params);
                meta.insert_derivation(path, hex::encode(child.public_key.serialize()), encoded);
            }
        }
        Ok(())
    }

    /// Clipped index range for the observable window enumerations.
    fn observable_range(
        &self,
        meta: &KeychainMeta,
        change: Change,
        from: u32,
        to: u32,
    ) -> std::ops::RangeInclusive<u32> {
        let window_end = meta.max_observable_index(change);
        if window_end == 0 {
            // Empty window, produce an empty range.
            return 1..=0;
        }
        let clipped = to.min(window_end - 1);
        from..=clipped
    }

    /// Validate the index-accounting invariants before a record is
    /// written; a violation aborts the operation and leaves the store
    /// untouched.
    fn check_invariants(&self, meta: &KeychainMeta) -> Result<(), EngineError> {
        for change in [Change::External, Change::Internal] {
            let frontier = meta.max_consecutive(change);
            for index in 0..frontier {
                let path = DerivationPath::new(change, index)?;
                if !meta.is_used(&path) {
                    return Err(EngineError::Internal(format!(
                        "index {change}/{index} below the frontier {frontier} is not used"
                    )));
                }
            }
            let at_frontier = DerivationPath::new(change, frontier)?;
            if meta.is_used(&at_frontier) {
                return Err(EngineError::Internal(format!(
                    "frontier {change}/{frontier} is already used"
                )));
            }
            for &gap in meta.non_consecutive(change) {
                if gap <= frontier {
                    return Err(EngineError::Internal(format!(
                        "gap index {change}/{gap} is not beyond the frontier {frontier}"
                    )));
                }
                let path = DerivationPath::new(change, gap)?;
                if !meta.is_used(&path) {
                    return Err(EngineError::Internal(format!(
                        "gap index {change}/{gap} is not marked used"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn decode_meta(descriptor: &str, data: &[u8]) -> Result<KeychainMeta, EngineError> {
    let meta: KeychainMeta = serde_json::from_slice(data)?;
    if meta.format_version > FORMAT_VERSION {
        return Err(EngineError::Internal(format!(
            "keychain {descriptor} has meta format {} but this build understands up to {}",
            meta.format_version, FORMAT_VERSION
        )));
    }
    Ok(meta)
}
