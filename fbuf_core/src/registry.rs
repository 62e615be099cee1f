//! Process-wide table of open sessions.
//!
//! Every open [`Session`](crate::Session) owns a slot in a global arena. The
//! slot holds the session's `File`, so [`force_close_all`] can close every
//! container (and delete half-written outputs) without touching the session
//! objects themselves. Slots are recycled through a free list, making both
//! registration and removal O(1). Each slot carries a generation, bumped on
//! removal, so a handle outliving its entry never reaches a recycled slot.
//!
//! `force_close_all` is meant for controlled shutdown or abort paths. It
//! takes the registry lock with a bounded wait, removes files, and logs, none
//! of which is async-signal-safe.

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::{const_mutex, Mutex};
use tracing::warn;

use crate::error::{FbufError, Result};
use crate::session::Mode;

/// How long `force_close_all` waits for the lock before giving up.
const FORCE_CLOSE_WAIT: Duration = Duration::from_millis(100);

static REGISTRY: Mutex<Registry> = const_mutex(Registry::new());

/// Slot index plus the generation it was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    index: usize,
    generation: u64,
}

pub(crate) struct Entry {
    pub name: String,
    pub mode: Mode,
    /// Deleted on force-close of a write session. `None` for sessions opened
    /// on an existing descriptor.
    pub path: Option<PathBuf>,
    pub file: File,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

struct Registry {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, entry: Entry) -> SessionHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        debug_assert!(slot.entry.is_none());
        slot.entry = Some(entry);
        SessionHandle {
            index,
            generation: slot.generation,
        }
    }

    fn get(&self, handle: SessionHandle) -> Option<&Entry> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)?
            .entry
            .as_ref()
    }

    fn remove(&mut self, handle: SessionHandle) -> Option<Entry> {
        let slot = self
            .slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)?;
        let entry = slot.entry.take()?;
        slot.generation += 1;
        self.free.push(handle.index);
        Some(entry)
    }

    /// Remove every live entry, recycling all slots.
    fn drain(&mut self) -> Vec<Entry> {
        let mut entries = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.entry.take() {
                slot.generation += 1;
                self.free.push(index);
                entries.push(entry);
            }
        }
        entries
    }

    fn live(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().filter_map(|slot| slot.entry.as_ref())
    }
}

pub(crate) fn register(entry: Entry) -> SessionHandle {
    REGISTRY.lock().insert(entry)
}

/// Remove a session's slot, returning its entry so the caller decides when
/// the file is closed. `None` once the session has been force-closed.
pub(crate) fn unregister(handle: SessionHandle) -> Option<Entry> {
    REGISTRY.lock().remove(handle)
}

/// A duplicate descriptor for the session's file, so I/O happens outside
/// the registry lock. Dups share the file offset with the registered file.
pub(crate) fn file(handle: SessionHandle, name: &str) -> Result<File> {
    let registry = REGISTRY.lock();
    let entry = registry.get(handle).ok_or_else(|| FbufError::ForceClosed {
        name: name.to_string(),
    })?;
    entry
        .file
        .try_clone()
        .map_err(|e| FbufError::io(name, "dup", e))
}

/// Close and release every registered session without finalizing headers.
///
/// Write sessions opened by path also have their output file deleted, so no
/// half-written container survives an abnormal exit. The registry is empty
/// afterwards; any further I/O through the released sessions fails with
/// [`FbufError::ForceClosed`].
///
/// Returns the number of sessions closed, or 0 if the registry lock could
/// not be taken in time.
pub fn force_close_all() -> usize {
    let Some(mut registry) = REGISTRY.try_lock_for(FORCE_CLOSE_WAIT) else {
        warn!("session registry busy; skipping forced cleanup");
        return 0;
    };
    let entries = registry.drain();
    drop(registry);

    let closed = entries.len();
    for entry in entries {
        let Entry {
            name,
            mode,
            path,
            file,
        } = entry;
        drop(file);

        if mode == Mode::Write {
            if let Some(path) = &path {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(file = %name, error = %e, "failed to remove partial output");
                }
            }
        }
        warn!(file = %name, ?mode, "force-closed session");
    }
    closed
}

/// Number of sessions currently registered.
pub fn open_count() -> usize {
    REGISTRY.lock().live().count()
}

/// Diagnostic names of every registered session.
pub fn open_sessions() -> Vec<String> {
    REGISTRY.lock().live().map(|e| e.name.clone()).collect()
}
