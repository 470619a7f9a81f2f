// Copyright (c) 2024 The Botho Foundation

//! Durable mint state.
//!
//! The state file is the only durable record of which sequence numbers have
//! been issued and which deposits are done. Every mutating call persists the
//! full snapshot before it returns, and the in-memory copy is only updated
//! once the write has landed, so memory never runs ahead of disk.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, warn};

use crate::{deposit::DepositId, error::StateError};

/// On-disk layout of the state file.
///
/// `pending_deposits` is optional so files written before reservations
/// existed still load.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    next_mint_counter: u64,

    #[serde(default)]
    processed_deposits: Vec<DepositId>,

    #[serde(default)]
    pending_deposits: BTreeMap<DepositId, u64>,
}

/// The aggregate guarded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MintState {
    next_sequence: u64,
    processed: BTreeSet<DepositId>,
    pending: BTreeMap<DepositId, u64>,
}

impl MintState {
    fn fresh() -> Self {
        Self {
            next_sequence: 1,
            processed: BTreeSet::new(),
            pending: BTreeMap::new(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Result<Self, StateError> {
        let mut state = Self {
            next_sequence: snapshot.next_mint_counter.max(1),
            processed: snapshot.processed_deposits.into_iter().collect(),
            pending: snapshot.pending_deposits,
        };

        // A hand-edited file must not let us reissue a reserved sequence
        if let Some(max_pending) = state.pending.values().copied().max() {
            if max_pending >= state.next_sequence {
                warn!(
                    "next_mint_counter {} is not above pending sequence {}; advancing",
                    state.next_sequence, max_pending
                );
                state.next_sequence = successor(max_pending)?;
            }
        }

        Ok(state)
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            next_mint_counter: self.next_sequence,
            processed_deposits: self.processed.iter().cloned().collect(),
            pending_deposits: self.pending.clone(),
        }
    }
}

/// Outcome of startup reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// New `next_sequence`, if it was fast-forwarded
    pub fast_forwarded_to: Option<u64>,

    /// Pending deposits found to be already minted, now processed
    pub recovered: Vec<(DepositId, u64)>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.fast_forwarded_to.is_none() && self.recovered.is_empty()
    }
}

/// File-backed store for the mint state.
///
/// Each operation takes the lock for its whole duration, so callers always
/// see atomic effects.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<MintState>,
}

impl StateStore {
    /// Load state from `path`, or initialize and persist a fresh state if the
    /// file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref().to_path_buf();

        let state = match fs::read(&path) {
            Ok(bytes) => {
                let snapshot: Snapshot =
                    serde_json::from_slice(&bytes).map_err(|source| StateError::Malformed {
                        path: path.clone(),
                        source,
                    })?;
                let state = MintState::from_snapshot(snapshot)?;
                info!(
                    "Loaded mint state: next_mint={}, processed={}, pending={}",
                    state.next_sequence,
                    state.processed.len(),
                    state.pending.len()
                );
                state
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let state = MintState::fresh();
                write_snapshot(&path, &state)?;
                info!("Initialized new state file: {}", path.display());
                state
            }
            Err(source) => return Err(StateError::Io { path, source }),
        };

        Ok(Self {
            path,
            inner: Mutex::new(state),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the deposit has been fully processed.
    pub fn is_processed(&self, id: &DepositId) -> bool {
        self.lock().processed.contains(id)
    }

    /// Reserve a sequence number for `id`.
    ///
    /// Idempotent: a deposit that already holds a reservation gets the same
    /// sequence back without any write. A fresh reservation is persisted
    /// before it is returned; if the write fails nothing changes in memory
    /// and the sequence is not consumed.
    pub fn reserve_sequence(&self, id: &DepositId) -> Result<u64, StateError> {
        let mut state = self.lock();

        if let Some(&sequence) = state.pending.get(id) {
            return Ok(sequence);
        }
        if state.processed.contains(id) {
            return Err(StateError::AlreadyProcessed(id.clone()));
        }

        let sequence = state.next_sequence;
        let mut next = state.clone();
        next.next_sequence = successor(sequence)?;
        next.pending.insert(id.clone(), sequence);

        write_snapshot(&self.path, &next)?;
        *state = next;

        debug!("Reserved sequence {} for deposit {}", sequence, id);
        Ok(sequence)
    }

    /// Move `id` from pending into processed and persist.
    ///
    /// Clearing an id without a reservation still records it as processed and
    /// persists.
    pub fn clear_reservation(&self, id: &DepositId) -> Result<(), StateError> {
        let mut state = self.lock();

        let mut next = state.clone();
        next.pending.remove(id);
        next.processed.insert(id.clone());

        write_snapshot(&self.path, &next)?;
        *state = next;

        debug!("Cleared reservation for deposit {}", id);
        Ok(())
    }

    /// Persist the current state as-is.
    pub fn save(&self) -> Result<(), StateError> {
        let state = self.lock();
        write_snapshot(&self.path, &state)
    }

    /// Reconcile local bookkeeping with the highest sequence observed
    /// on-chain.
    ///
    /// Fast-forwards `next_sequence` past `max_on_chain`, then treats every
    /// pending reservation at or below it as completed. Persists once, and
    /// only if something changed.
    pub fn reconcile(&self, max_on_chain: u64) -> Result<ReconcileReport, StateError> {
        let mut state = self.lock();

        let mut next = state.clone();
        let mut report = ReconcileReport::default();

        if max_on_chain >= next.next_sequence {
            next.next_sequence = successor(max_on_chain)?;
            report.fast_forwarded_to = Some(next.next_sequence);
        }

        let minted: Vec<(DepositId, u64)> = next
            .pending
            .iter()
            .filter(|(_, sequence)| **sequence <= max_on_chain)
            .map(|(id, sequence)| (id.clone(), *sequence))
            .collect();

        for (id, _) in &minted {
            next.pending.remove(id);
            next.processed.insert(id.clone());
        }
        report.recovered = minted;

        if !report.is_empty() {
            write_snapshot(&self.path, &next)?;
            *state = next;
        }

        Ok(report)
    }

    /// The next sequence number that would be issued.
    pub fn next_sequence(&self) -> u64 {
        self.lock().next_sequence
    }

    /// Sequence reserved for `id`, if any.
    pub fn pending_sequence(&self, id: &DepositId) -> Option<u64> {
        self.lock().pending.get(id).copied()
    }

    /// Copy of all in-flight reservations.
    pub fn pending(&self) -> BTreeMap<DepositId, u64> {
        self.lock().pending.clone()
    }

    pub fn processed_count(&self) -> usize {
        self.lock().processed.len()
    }

    /// Format a human-readable summary.
    pub fn summary(&self) -> String {
        let state = self.lock();
        let mut out = format!(
            "Mint State ({}):\n  Next sequence: {}\n  Processed deposits: {}\n  Pending reservations: {}",
            self.path.display(),
            state.next_sequence,
            state.processed.len(),
            state.pending.len()
        );
        for (id, sequence) in &state.pending {
            out.push_str(&format!("\n    {} -> {}", id, sequence));
        }
        out
    }

    fn lock(&self) -> MutexGuard<'_, MintState> {
        // Memory is only replaced after a successful write, so a panic while
        // holding the lock cannot leave a half-applied state behind.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The sequence issued after `sequence`.
fn successor(sequence: u64) -> Result<u64, StateError> {
    sequence
        .checked_add(1)
        .ok_or(StateError::SequenceExhausted(sequence))
}

/// Write the snapshot to a temp file and rename it over `path`.
fn write_snapshot(path: &Path, state: &MintState) -> Result<(), StateError> {
    let content = serde_json::to_vec_pretty(&state.to_snapshot()).map_err(StateError::Encode)?;

    let mut temp = OsString::from(path.as_os_str());
    temp.push(".tmp");
    let temp_path = PathBuf::from(temp);

    let result = write_file(&temp_path, &content).and_then(|_| fs::rename(&temp_path, path));
    if let Err(source) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(StateError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    // The new snapshot is in place; memory must follow it even if the
    // directory entry is not yet durable.
    if let Err(e) = sync_parent(path) {
        warn!("Failed to sync directory of {}: {}", path.display(), e);
    }

    debug!("Saved mint state: next_mint={}", state.next_sequence);
    Ok(())
}

fn write_file(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

/// Make the rename itself durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::File::open(parent)?.sync_all(),
        _ => fs::File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(s: &str) -> DepositId {
        DepositId::new(s)
    }

    #[test]
    fn test_load_initializes_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");

        let store = StateStore::load(&path).unwrap();
        assert_eq!(store.next_sequence(), 1);
        assert_eq!(store.processed_count(), 0);
        assert!(store.pending().is_empty());
        assert!(path.exists());

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["next_mint_counter"], 1);
        assert!(raw["processed_deposits"].as_array().unwrap().is_empty());
        assert!(raw["pending_deposits"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            StateStore::load(&path),
            Err(StateError::Malformed { .. })
        ));
    }

    #[test]
    fn test_load_legacy_file_without_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        fs::write(
            &path,
            r#"{"next_mint_counter": 12, "processed_deposits": ["a", "b"]}"#,
        )
        .unwrap();

        let store = StateStore::load(&path).unwrap();
        assert_eq!(store.next_sequence(), 12);
        assert!(store.is_processed(&id("a")));
        assert!(store.is_processed(&id("b")));
        assert!(store.pending().is_empty());
    }

    #[test]
    fn test_load_advances_counter_past_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        fs::write(
            &path,
            r#"{"next_mint_counter": 3, "processed_deposits": [], "pending_deposits": {"x": 5}}"#,
        )
        .unwrap();

        let store = StateStore::load(&path).unwrap();
        assert_eq!(store.next_sequence(), 6);
    }

    #[test]
    fn test_reserve_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        let store = StateStore::load(&path).unwrap();

        let first = store.reserve_sequence(&id("txA")).unwrap();
        assert_eq!(first, 1);

        // A second reservation must not write; prove it by removing the file
        fs::remove_file(&path).unwrap();
        let second = store.reserve_sequence(&id("txA")).unwrap();
        assert_eq!(second, first);
        assert!(!path.exists());
        assert_eq!(store.next_sequence(), 2);
    }

    #[test]
    fn test_reserve_processed_deposit_is_rejected() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path().join("mint.state")).unwrap();

        store.reserve_sequence(&id("txA")).unwrap();
        store.clear_reservation(&id("txA")).unwrap();

        assert!(matches!(
            store.reserve_sequence(&id("txA")),
            Err(StateError::AlreadyProcessed(_))
        ));
        assert_eq!(store.next_sequence(), 2);
    }

    #[test]
    fn test_no_sequence_collision_across_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");

        let ids: Vec<DepositId> = (0..10).map(|i| id(&format!("tx{}", i))).collect();
        let mut sequences = Vec::new();

        let mut store = StateStore::load(&path).unwrap();
        for (i, deposit) in ids.iter().enumerate() {
            if i % 3 == 2 {
                // Simulate a restart
                drop(store);
                store = StateStore::load(&path).unwrap();
            }
            sequences.push(store.reserve_sequence(deposit).unwrap());
            // Retries after a restart return the same value
            assert_eq!(store.reserve_sequence(deposit).unwrap(), sequences[i]);
        }

        let unique: BTreeSet<u64> = sequences.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());

        let reloaded = StateStore::load(&path).unwrap();
        for sequence in &sequences {
            assert!(*sequence < reloaded.next_sequence());
        }
        assert_eq!(reloaded.pending().len(), ids.len());
    }

    #[test]
    fn test_clear_reservation_is_permanent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        let store = StateStore::load(&path).unwrap();

        store.reserve_sequence(&id("txA")).unwrap();
        store.clear_reservation(&id("txA")).unwrap();
        assert!(store.is_processed(&id("txA")));
        assert_eq!(store.pending_sequence(&id("txA")), None);

        // Clearing again is harmless
        store.clear_reservation(&id("txA")).unwrap();
        assert!(store.is_processed(&id("txA")));

        let reloaded = StateStore::load(&path).unwrap();
        assert!(reloaded.is_processed(&id("txA")));
        assert!(reloaded.pending().is_empty());
        assert_eq!(reloaded.next_sequence(), 2);
    }

    #[test]
    fn test_failed_persist_does_not_leak_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        let store = StateStore::load(&path).unwrap();

        // Renaming a file over a directory fails
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(matches!(
            store.reserve_sequence(&id("txA")),
            Err(StateError::Io { .. })
        ));
        assert_eq!(store.next_sequence(), 1);
        assert_eq!(store.pending_sequence(&id("txA")), None);

        fs::remove_dir(&path).unwrap();
        assert_eq!(store.reserve_sequence(&id("txA")).unwrap(), 1);
        assert!(path.is_file());
    }

    #[test]
    fn test_sync_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("mint.state");
        fs::create_dir(path.parent().unwrap()).unwrap();

        let store = StateStore::load(&path).unwrap();
        store.reserve_sequence(&id("txA")).unwrap();
        sync_parent(&path).unwrap();
        sync_parent(Path::new("mint.state")).unwrap();
        assert_eq!(StateStore::load(&path).unwrap().pending_sequence(&id("txA")), Some(1));
    }

    #[test]
    fn test_reconcile_recovers_minted_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        fs::write(
            &path,
            r#"{"next_mint_counter": 7, "processed_deposits": [], "pending_deposits": {}}"#,
        )
        .unwrap();

        let store = StateStore::load(&path).unwrap();
        assert_eq!(store.reserve_sequence(&id("txA")).unwrap(), 7);
        assert_eq!(store.reserve_sequence(&id("txB")).unwrap(), 8);
        drop(store);

        // Restart without clearing, then reconcile against the chain
        let store = StateStore::load(&path).unwrap();
        let report = store.reconcile(7).unwrap();

        assert_eq!(report.fast_forwarded_to, None);
        assert_eq!(report.recovered, vec![(id("txA"), 7)]);
        assert!(store.is_processed(&id("txA")));
        assert_eq!(store.pending_sequence(&id("txA")), None);
        assert_eq!(store.pending_sequence(&id("txB")), Some(8));

        let reloaded = StateStore::load(&path).unwrap();
        assert!(reloaded.is_processed(&id("txA")));
        assert!(!reloaded.pending().contains_key(&id("txA")));
    }

    #[test]
    fn test_reconcile_fast_forwards() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        let store = StateStore::load(&path).unwrap();

        let report = store.reconcile(41).unwrap();
        assert_eq!(report.fast_forwarded_to, Some(42));
        assert_eq!(store.next_sequence(), 42);
        assert_eq!(store.reserve_sequence(&id("tx")).unwrap(), 42);

        // Nothing to do the second time
        let report = store.reconcile(41).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_reconcile_rejects_exhausted_counter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        let store = StateStore::load(&path).unwrap();
        store.reserve_sequence(&id("txA")).unwrap();

        assert!(matches!(
            store.reconcile(u64::MAX),
            Err(StateError::SequenceExhausted(u64::MAX))
        ));
        // Nothing changed in memory or on disk
        assert_eq!(store.next_sequence(), 2);
        assert_eq!(store.pending_sequence(&id("txA")), Some(1));
        assert_eq!(StateStore::load(&path).unwrap().next_sequence(), 2);

        // The last representable sequence is still issued, then no more
        let report = store.reconcile(u64::MAX - 2).unwrap();
        assert_eq!(report.fast_forwarded_to, Some(u64::MAX - 1));
        assert_eq!(store.reserve_sequence(&id("txB")).unwrap(), u64::MAX - 1);
        assert!(matches!(
            store.reserve_sequence(&id("txC")),
            Err(StateError::SequenceExhausted(_))
        ));
        assert_eq!(store.next_sequence(), u64::MAX);
        assert_eq!(store.pending_sequence(&id("txC")), None);
    }

    #[test]
    fn test_load_rejects_exhausted_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mint.state");
        fs::write(
            &path,
            r#"{"next_mint_counter": 3, "pending_deposits": {"x": 18446744073709551615}}"#,
        )
        .unwrap();

        assert!(matches!(
            StateStore::load(&path),
            Err(StateError::SequenceExhausted(u64::MAX))
        ));
    }
}
