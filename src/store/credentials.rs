//! MRU-ordered list of saved networks.
//!
//! The whole list lives in one blob (`wifi_store::wifi_list`) made of
//! [`RECORD_SIZE`]-byte slots.  Every mutation loads the list, edits it in
//! memory and rewrites the blob in a single commit, so a reader either sees
//! the old list or the new one.
//!
//! Invariants after any successful call:
//! - the blob is absent, or its length is `N * RECORD_SIZE` with
//!   `N <= max_saved`;
//! - SSIDs are pairwise distinct;
//! - slot 0 is the network that most recently reached `StaGotIp`.

use log::{error, info, warn};

use super::record::{CredentialRecord, RECORD_SIZE, Ssid};
use crate::app::ports::{StorageError, StoragePort};
use crate::error::{Error, Result};

pub const STORE_NAMESPACE: &str = "wifi_store";
pub const STORE_KEY: &str = "wifi_list";

pub struct CredentialStore<S: StoragePort> {
    storage: S,
    namespace: &'static str,
    max_saved: usize,
    initialised: bool,
}

impl<S: StoragePort> CredentialStore<S> {
    /// `max_saved` of zero is treated as one.
    pub fn new(storage: S, max_saved: usize) -> Self {
        Self::with_namespace(storage, STORE_NAMESPACE, max_saved)
    }

    pub fn with_namespace(storage: S, namespace: &'static str, max_saved: usize) -> Self {
        Self {
            storage,
            namespace,
            max_saved: max_saved.max(1),
            initialised: false,
        }
    }

    pub fn max_saved(&self) -> usize {
        self.max_saved
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Bring up the key-value layer and validate the stored blob.
    ///
    /// A blob with an impossible shape is erased once; if it is still
    /// unreadable afterwards the error is surfaced.
    pub fn init(&mut self) -> Result<()> {
        if self.initialised {
            return Ok(());
        }
        self.storage.init()?;

        match self.load_all() {
            Ok(list) => info!("CredentialStore: {} saved network(s)", list.len()),
            Err(Error::CorruptStore) => {
                warn!("CredentialStore: stored list corrupt, erasing");
                self.storage.delete(self.namespace, STORE_KEY)?;
                self.load_all()?;
            }
            Err(e) => return Err(e),
        }

        self.initialised = true;
        Ok(())
    }

    /// Saved networks, head first, at most `max_saved` of them.
    /// A missing blob is an empty list.
    pub fn load_all(&self) -> Result<Vec<CredentialRecord>> {
        let blob = match self.storage.read(self.namespace, STORE_KEY) {
            Ok(blob) => blob,
            Err(StorageError::NotFound) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if blob.len() % RECORD_SIZE != 0 {
            warn!(
                "CredentialStore: blob length {} is not a multiple of {}",
                blob.len(),
                RECORD_SIZE
            );
            return Err(Error::CorruptStore);
        }

        let mut list: Vec<CredentialRecord> = Vec::with_capacity(blob.len() / RECORD_SIZE);
        for slot in blob.chunks_exact(RECORD_SIZE) {
            let Some(rec) = CredentialRecord::decode(slot)? else {
                continue;
            };
            if list.iter().any(|r| r.ssid.same_network(&rec.ssid)) {
                continue;
            }
            list.push(rec);
            if list.len() == self.max_saved {
                break;
            }
        }
        Ok(list)
    }

    /// Look up one saved network by SSID.
    pub fn find(&self, ssid: &Ssid) -> Result<CredentialRecord> {
        self.load_all()?
            .into_iter()
            .find(|r| r.ssid.same_network(ssid))
            .ok_or(Error::NotFound)
    }

    /// Promote `record` to the head of the list.
    ///
    /// An existing entry for the same SSID moves to slot 0 (entries ahead
    /// of it shift down by one); a new SSID is prepended and the tail is
    /// evicted when the list is full.
    pub fn on_success(&mut self, record: &CredentialRecord) -> Result<()> {
        if !record.is_valid() {
            return Err(Error::InvalidArg("empty ssid"));
        }

        let mut list = self.load_all()?;
        if let Some(i) = list.iter().position(|r| r.ssid.same_network(&record.ssid)) {
            list.remove(i);
        }
        list.insert(0, record.clone());
        list.truncate(self.max_saved);

        self.commit(&list)?;
        info!(
            "CredentialStore: promoted '{}' to head ({} saved)",
            record.ssid,
            list.len()
        );
        Ok(())
    }

    /// Remove every entry for `ssid`.  Returns how many were removed.
    pub fn forget(&mut self, ssid: &Ssid) -> Result<usize> {
        let mut list = self.load_all()?;
        let before = list.len();
        list.retain(|r| !r.ssid.same_network(ssid));
        let removed = before - list.len();
        if removed == 0 {
            return Ok(0);
        }

        self.commit(&list)?;
        info!("CredentialStore: forgot '{}'", ssid);
        Ok(removed)
    }

    /// Remove the entry at `index` (as reported by [`load_all`](Self::load_all)).
    pub fn forget_at(&mut self, index: usize) -> Result<CredentialRecord> {
        let mut list = self.load_all()?;
        if index >= list.len() {
            return Err(Error::NotFound);
        }
        let removed = list.remove(index);
        self.commit(&list)?;
        info!("CredentialStore: forgot slot {} ('{}')", index, removed.ssid);
        Ok(removed)
    }

    /// Rewrite the blob in one commit.  An empty list erases the key.
    fn commit(&mut self, list: &[CredentialRecord]) -> Result<()> {
        let result = if list.is_empty() {
            self.storage.delete(self.namespace, STORE_KEY)
        } else {
            let mut blob = Vec::with_capacity(list.len() * RECORD_SIZE);
            for rec in list.iter().filter(|r| r.is_valid()) {
                blob.extend_from_slice(&rec.encode());
            }
            self.storage.write(self.namespace, STORE_KEY, &blob)
        };
        result.map_err(|e| {
            error!("CredentialStore: commit failed: {}", e);
            Error::from(e)
        })
    }
}
