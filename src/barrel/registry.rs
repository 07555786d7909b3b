//! Barrel registry.
//!
//! All mutations (add, remove, rename, sort) run under one mutex and, once
//! done, publish a new immutable [`BarrelSnapshot`]. Readers only ever clone
//! the current snapshot's `Arc` and never hold a lock while reading it.
//!
//! Readers that want to open a barrel's files take a [`BarrelLease`] first.
//! Removing a barrel marks every lease on it dirty before the files are
//! deleted, so cursors built from the lease fail with
//! [`QuiverError::StaleSegment`] instead of reading a vanished file.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use crate::DocId;
use crate::barrel::info::BarrelInfo;
use crate::barrel::persist::{self, PersistedRegistry, REGISTRY_TEMP_FILE};
use crate::barrel::{BARREL_FILE_EXTENSIONS, barrel_file};
use crate::error::{QuiverError, Result};
use crate::posting::DirtyFlag;
use crate::storage::Storage;

/// Registry change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrelEvent {
    Added(String),
    Flushed(String),
    Renamed { from: String, to: String },
    Removed(String),
    /// Renames applied by [`BarrelRegistry::sort`], as `(old, new)` pairs.
    Sorted(Vec<(String, String)>),
}

/// Immutable view of the registered barrels.
#[derive(Debug, Clone, Default)]
pub struct BarrelSnapshot {
    /// Incremented by every published change.
    pub version: u64,
    pub barrel_counter: u64,
    pub max_doc: DocId,
    pub barrels: Vec<BarrelInfo>,
}

impl BarrelSnapshot {
    pub fn get(&self, name: &str) -> Option<&BarrelInfo> {
        self.barrels.iter().find(|b| b.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.barrels.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.barrels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barrels.is_empty()
    }

    /// Total number of documents over all barrels.
    pub fn doc_count(&self) -> u64 {
        self.barrels.iter().map(|b| b.doc_count as u64).sum()
    }
}

/// Per-barrel state shared with leases.
#[derive(Debug, Clone)]
struct BarrelHandle {
    /// Current name; follows renames of the barrel while it is in memory.
    name: Arc<RwLock<String>>,
    dirty: DirtyFlag,
    attached: Arc<AtomicUsize>,
    files: Arc<Mutex<()>>,
}

impl BarrelHandle {
    fn new(name: &str) -> Self {
        BarrelHandle {
            name: Arc::new(RwLock::new(name.to_string())),
            dirty: DirtyFlag::new(),
            attached: Arc::new(AtomicUsize::new(0)),
            files: Arc::new(Mutex::new(())),
        }
    }

    fn same_barrel(&self, other: &BarrelHandle) -> bool {
        Arc::ptr_eq(&self.files, &other.files)
    }
}

/// A reader's claim on a registered barrel.
#[derive(Debug)]
pub struct BarrelLease {
    handle: BarrelHandle,
}

impl BarrelLease {
    /// Current name of the barrel. Renames of an in-memory barrel show up
    /// here; renames of a flushed one make the lease stale instead.
    pub fn name(&self) -> String {
        self.handle.name.read().clone()
    }

    /// Flag set once the barrel is removed or its files move.
    pub fn dirty_flag(&self) -> DirtyFlag {
        self.handle.dirty.clone()
    }

    pub fn is_stale(&self) -> bool {
        self.handle.dirty.is_dirty()
    }

    /// Hold the barrel's file lock, so its files are not renamed or deleted
    /// while readers open them.
    pub fn lock_files(&self) -> MutexGuard<'_, ()> {
        self.handle.files.lock()
    }
}

impl Drop for BarrelLease {
    fn drop(&mut self) {
        self.handle.attached.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Default)]
struct RegistryState {
    barrels: Vec<BarrelInfo>,
    barrel_counter: u64,
    max_doc: DocId,
    version: u64,
    handles: AHashMap<String, BarrelHandle>,
}

impl RegistryState {
    fn position(&self, name: &str) -> Option<usize> {
        self.barrels.iter().position(|b| b.name == name)
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.position(name)
            .ok_or_else(|| QuiverError::barrel(format!("barrel {name} is not registered")))
    }

    fn next_name(&mut self) -> String {
        let name = format!("_{}", self.barrel_counter);
        self.barrel_counter += 1;
        name
    }

    fn persisted(&self) -> PersistedRegistry {
        PersistedRegistry {
            barrel_counter: self.barrel_counter,
            max_doc: self.max_doc,
            barrels: self.barrels.clone(),
        }
    }
}

/// Registry of the barrels stored in one [`Storage`].
///
/// Every mutation is applied to a copy of the state and only replaces it once
/// the copy has been saved, so a failed save or file operation leaves the
/// registry as it was.
#[derive(Debug)]
pub struct BarrelRegistry {
    storage: Arc<dyn Storage>,
    state: Mutex<RegistryState>,
    snapshot: RwLock<Arc<BarrelSnapshot>>,
    subscribers: Mutex<Vec<Sender<BarrelEvent>>>,
}

impl BarrelRegistry {
    /// Open the registry stored in `storage`, creating an empty one if none
    /// was saved yet.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        if storage.file_exists(REGISTRY_TEMP_FILE) {
            warn!("removing leftover {REGISTRY_TEMP_FILE}");
            storage.delete_file(REGISTRY_TEMP_FILE)?;
        }

        let mut state = RegistryState::default();
        if let Some(saved) = persist::load(storage.as_ref())? {
            state.barrel_counter = saved.barrel_counter;
            state.max_doc = saved.max_doc;
            state.barrels = saved.barrels;
            info!(
                barrels = state.barrels.len(),
                counter = state.barrel_counter,
                "loaded barrel registry"
            );
        }

        // Files of a barrel flushed but never registered still claim their name.
        for file in storage.list_files()? {
            if let Some(number) = barrel_number(&file) {
                state.barrel_counter = state.barrel_counter.max(number + 1);
            }
        }

        for barrel in &state.barrels {
            state
                .handles
                .insert(barrel.name.clone(), BarrelHandle::new(&barrel.name));
        }

        let registry = BarrelRegistry {
            storage,
            snapshot: RwLock::new(Arc::new(BarrelSnapshot::default())),
            state: Mutex::new(state),
            subscribers: Mutex::new(Vec::new()),
        };
        registry.publish(&mut registry.state.lock());
        Ok(registry)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The current barrel list.
    pub fn snapshot(&self) -> Arc<BarrelSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Receive every future registry event.
    pub fn subscribe(&self) -> Receiver<BarrelEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Reserve the next barrel name. Names are never handed out twice, even
    /// after the barrel is removed or the registry is reopened.
    pub fn new_barrel(&self) -> Result<String> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let name = next.next_name();
        self.commit(&mut state, next)?;
        Ok(name)
    }

    /// Register a barrel.
    pub fn add_barrel(&self, barrel: BarrelInfo) -> Result<()> {
        barrel.validate()?;

        let mut state = self.state.lock();
        if state.position(&barrel.name).is_some() {
            return Err(QuiverError::barrel(format!(
                "barrel {} is already registered",
                barrel.name
            )));
        }

        let name = barrel.name.clone();
        let mut next = state.clone();
        if barrel.doc_count > 0 {
            next.max_doc = next.max_doc.max(barrel.max_doc_id);
        }
        next.barrels.push(barrel);
        next.handles.insert(name.clone(), BarrelHandle::new(&name));
        self.commit(&mut state, next)?;

        info!(barrel = %name, "added barrel");
        self.notify(BarrelEvent::Added(name));
        Ok(())
    }

    /// Replace the metadata of a barrel whose flush completed.
    pub fn flush_completed(&self, barrel: BarrelInfo) -> Result<()> {
        barrel.validate()?;
        let mut state = self.state.lock();
        self.flush_completed_locked(&mut state, barrel)
    }

    /// Record the flush of the in-memory barrel held through `lease`.
    ///
    /// The barrel may have been renamed while its files were written under
    /// `barrel.name`; the files then move to its current name. Files of a
    /// barrel removed in the meantime are deleted and the flush fails with
    /// [`QuiverError::StaleSegment`].
    pub fn complete_flush(&self, lease: &BarrelLease, mut barrel: BarrelInfo) -> Result<BarrelInfo> {
        barrel.validate()?;

        let mut state = self.state.lock();
        let current = lease.name();
        let registered = state
            .handles
            .get(&current)
            .is_some_and(|h| h.same_barrel(&lease.handle));

        if !registered {
            warn!(barrel = %barrel.name, "barrel removed while flushing, deleting its files");
            let _files = lease.lock_files();
            self.delete_files(&barrel.name);
            return Err(QuiverError::stale_segment(barrel.name));
        }

        if barrel.name != current {
            let _files = lease.lock_files();
            self.move_files(&barrel.name, &current)?;
            barrel.name = current;
        }

        self.flush_completed_locked(&mut state, barrel.clone())?;
        Ok(barrel)
    }

    fn flush_completed_locked(&self, state: &mut RegistryState, barrel: BarrelInfo) -> Result<()> {
        let index = state.require(&barrel.name)?;
        let name = barrel.name.clone();

        let mut next = state.clone();
        if barrel.doc_count > 0 {
            next.max_doc = next.max_doc.max(barrel.max_doc_id);
        }
        let replaced = if next.barrels[index].in_memory && !barrel.in_memory {
            next.handles.insert(name.clone(), BarrelHandle::new(&name))
        } else {
            None
        };
        next.barrels[index] = barrel;
        self.commit(state, next)?;

        // Live cursors of the in-memory barrel go stale; disk readers get a
        // fresh flag.
        if let Some(old) = replaced {
            old.dirty.mark();
        }

        info!(barrel = %name, "barrel flushed");
        self.notify(BarrelEvent::Flushed(name));
        Ok(())
    }

    /// Claim a barrel for reading.
    pub fn attach(&self, name: &str) -> Result<BarrelLease> {
        let mut state = self.state.lock();
        state.require(name)?;
        let handle = state
            .handles
            .entry(name.to_string())
            .or_insert_with(|| BarrelHandle::new(name))
            .clone();
        handle.attached.fetch_add(1, Ordering::AcqRel);

        Ok(BarrelLease { handle })
    }

    /// Number of live leases on `name`.
    pub fn attached_readers(&self, name: &str) -> usize {
        self.state
            .lock()
            .handles
            .get(name)
            .map_or(0, |h| h.attached.load(Ordering::Acquire))
    }

    /// Unregister a barrel and delete its files.
    ///
    /// The registry is saved first; if that fails the barrel stays
    /// registered. Leases on the barrel are then marked dirty before any file
    /// is deleted. The barrel stays unregistered even when deleting a file
    /// fails; the failure is reported as a [`QuiverError::Barrel`].
    pub fn remove_barrel(&self, name: &str) -> Result<BarrelInfo> {
        let mut state = self.state.lock();
        let index = state.require(name)?;

        let mut next = state.clone();
        let removed = next.barrels.remove(index);
        let handle = next
            .handles
            .remove(name)
            .unwrap_or_else(|| BarrelHandle::new(name));
        self.commit(&mut state, next)?;

        handle.dirty.mark();
        let attached = handle.attached.load(Ordering::Acquire);

        let failures = if removed.in_memory {
            Vec::new()
        } else {
            let _files = handle.files.lock();
            self.delete_files(name)
        };

        info!(barrel = name, attached, "removed barrel");
        self.notify(BarrelEvent::Removed(name.to_string()));

        if !failures.is_empty() {
            return Err(QuiverError::barrel(format!(
                "barrel {name} removed but files remain: {}",
                failures.join(", ")
            )));
        }
        Ok(removed)
    }

    /// Rename a barrel, moving its files if it was already flushed.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let mut state = self.state.lock();
        let index = state.require(old)?;
        if state.position(new).is_some() {
            return Err(QuiverError::barrel(format!("barrel {new} already exists")));
        }

        let mut next = state.clone();
        let mut applied = Vec::new();
        let result = match self.rename_locked(&mut next, index, new) {
            Ok(()) => {
                applied.push((new.to_string(), old.to_string()));
                self.save(&next)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.roll_back(&mut state, next, applied);
            return Err(e);
        }
        self.install(&mut state, next);

        info!(from = old, to = new, "renamed barrel");
        self.notify(BarrelEvent::Renamed {
            from: old.to_string(),
            to: new.to_string(),
        });
        Ok(())
    }

    fn rename_locked(&self, state: &mut RegistryState, index: usize, new: &str) -> Result<()> {
        let old = state.barrels[index].name.clone();
        let handle = state
            .handles
            .remove(&old)
            .unwrap_or_else(|| BarrelHandle::new(&old));

        if state.barrels[index].in_memory {
            {
                // Waits for a flush still writing under the old name.
                let _files = handle.files.lock();
                *handle.name.write() = new.to_string();
            }
            state.handles.insert(new.to_string(), handle);
        } else {
            let moved = {
                let _files = handle.files.lock();
                self.move_files(&old, new)
            };
            if let Err(e) = moved {
                state.handles.insert(old, handle);
                return Err(e);
            }
            // Open readers still point at the old file names.
            handle.dirty.mark();
            state.handles.insert(new.to_string(), BarrelHandle::new(new));
        }

        state.barrels[index].name = new.to_string();
        Ok(())
    }

    /// Order barrels by `(base doc id, doc count)` descending and give them
    /// fresh sequential names in that order.
    ///
    /// Every barrel first moves to a temporary name so the final names can
    /// never collide with an existing one. If any step fails, the renames
    /// already done are undone and the registry keeps its previous names.
    pub fn sort(&self) -> Result<Vec<(String, String)>> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let mut applied = Vec::new();

        let renames = match self.sort_into(&mut next, &mut applied) {
            Ok(renames) => renames,
            Err(e) => {
                self.roll_back(&mut state, next, applied);
                return Err(QuiverError::barrel(format!("sort aborted: {e}")));
            }
        };
        self.install(&mut state, next);

        info!(barrels = renames.len(), "sorted barrels");
        self.notify(BarrelEvent::Sorted(renames.clone()));
        Ok(renames)
    }

    /// Apply the sort to `state`, recording every completed rename in
    /// `applied` as `(current, previous)`.
    fn sort_into(
        &self,
        state: &mut RegistryState,
        applied: &mut Vec<(String, String)>,
    ) -> Result<Vec<(String, String)>> {
        state.barrels.sort_by(|a, b| {
            (b.base_doc_id(), b.doc_count).cmp(&(a.base_doc_id(), a.doc_count))
        });

        let originals: Vec<String> = state.barrels.iter().map(|b| b.name.clone()).collect();
        for (index, name) in originals.iter().enumerate() {
            let temp = format!("{name}.sorting");
            self.rename_locked(state, index, &temp)?;
            applied.push((temp, name.clone()));
        }

        let mut renames = Vec::with_capacity(originals.len());
        for (index, original) in originals.into_iter().enumerate() {
            let name = state.next_name();
            let temp = state.barrels[index].name.clone();
            self.rename_locked(state, index, &name)?;
            applied.push((name.clone(), temp));
            renames.push((original, name));
        }

        self.save(state)?;
        Ok(renames)
    }

    /// Undo the renames in `applied` on `next` and make it the current state.
    ///
    /// When every rename is undone the barrel list is exactly the previous
    /// one. Otherwise `next` keeps the names matching the files on disk and is
    /// saved and published as is.
    fn roll_back(
        &self,
        state: &mut RegistryState,
        mut next: RegistryState,
        applied: Vec<(String, String)>,
    ) {
        let mut restored = true;
        for (current, previous) in applied.into_iter().rev() {
            let undone = next
                .require(&current)
                .and_then(|index| self.rename_locked(&mut next, index, &previous));
            if let Err(e) = undone {
                warn!(from = %current, to = %previous, error = %e, "failed to undo barrel rename");
                restored = false;
            }
        }

        if restored {
            // Only the handles changed: leases on moved files are stale.
            next.barrels = state.barrels.clone();
            next.barrel_counter = state.barrel_counter;
            *state = next;
        } else {
            if let Err(e) = self.save(&next) {
                warn!(error = %e, "failed to save barrel registry after an aborted rename");
            }
            self.install(state, next);
        }
    }

    /// Move the files of barrel `from` to `to`. Files already moved are put
    /// back when one rename fails.
    fn move_files(&self, from: &str, to: &str) -> Result<()> {
        for (i, ext) in BARREL_FILE_EXTENSIONS.iter().enumerate() {
            let source = barrel_file(from, ext);
            let target = barrel_file(to, ext);
            if let Err(e) = self.storage.rename_file(&source, &target) {
                for ext in &BARREL_FILE_EXTENSIONS[..i] {
                    let (moved, back) = (barrel_file(to, ext), barrel_file(from, ext));
                    if let Err(undo) = self.storage.rename_file(&moved, &back) {
                        warn!(file = %moved, error = %undo, "failed to move barrel file back");
                    }
                }
                return Err(QuiverError::barrel(format!(
                    "failed to rename {source} to {target}: {e}"
                )));
            }
        }
        Ok(())
    }

    /// Delete the files of barrel `name`, returning the ones that failed.
    fn delete_files(&self, name: &str) -> Vec<String> {
        let mut failures = Vec::new();
        for ext in BARREL_FILE_EXTENSIONS {
            let file = barrel_file(name, ext);
            if let Err(e) = self.storage.delete_file(&file) {
                warn!(barrel = name, file = %file, error = %e, "failed to delete barrel file");
                failures.push(format!("{file}: {e}"));
            }
        }
        failures
    }

    /// Save `next` and make it the published state.
    fn commit(&self, state: &mut RegistryState, next: RegistryState) -> Result<()> {
        self.save(&next)?;
        self.install(state, next);
        Ok(())
    }

    fn install(&self, state: &mut RegistryState, next: RegistryState) {
        *state = next;
        self.publish(state);
    }

    fn save(&self, state: &RegistryState) -> Result<()> {
        persist::save(self.storage.as_ref(), &state.persisted())
            .map_err(|e| QuiverError::barrel(format!("failed to save barrel registry: {e}")))
    }

    fn publish(&self, state: &mut RegistryState) {
        state.version += 1;
        let snapshot = BarrelSnapshot {
            version: state.version,
            barrel_counter: state.barrel_counter,
            max_doc: state.max_doc,
            barrels: state.barrels.clone(),
        };
        *self.snapshot.write() = Arc::new(snapshot);
    }

    fn notify(&self, event: BarrelEvent) {
        self.subscribers
            .lock()
            .retain(|sender| sender.send(event.clone()).is_ok());
    }
}

/// Number of a barrel file such as `_12.dfp` or the registry-free `_12`.
fn barrel_number(file: &str) -> Option<u64> {
    let stem = file.strip_prefix('_')?;
    let digits = stem.split('.').next()?;
    digits.parse().ok()
}
