//! Working copies: editable overlays of units, shared per (unit, owner)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use grove_core::{DiffEngine, GroveError, GroveResult, StructureDiff};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::builder::{unit_infos, unit_structure};
use crate::cache::ElementInfoCache;
use crate::handle::{ElementKind, Handle};
use crate::info::ElementInfo;

const EVENT_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum WorkingCopyError {
    #[error("{0} is not a compilation unit")]
    NotAUnit(String),

    #[error("{0} is not a working copy")]
    NotAWorkingCopy(String),

    #[error("Cannot create working copy of {unit}: {reason}")]
    Factory { unit: String, reason: String },

    #[error("Working copy of {0} is closed")]
    Closed(String),
}

/// Who a working copy belongs to. The primary owner's working copies are the
/// ones the rest of the workspace sees.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Owner(String);

impl Owner {
    const PRIMARY: &'static str = "primary";

    pub fn primary() -> Self {
        Owner(Self::PRIMARY.to_string())
    }

    pub fn new(name: impl Into<String>) -> Self {
        Owner(name.into())
    }

    pub fn is_primary(&self) -> bool {
        self.0 == Self::PRIMARY
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receives problems found while reconciling a working copy.
pub trait ProblemSink: Send + Sync {
    fn report(&self, unit: &Handle, problem: &str);
}

#[derive(Debug)]
struct Buffer {
    committed: String,
    contents: String,
    closed: bool,
}

/// In-memory contents of a unit being edited.
#[derive(Debug)]
pub struct Overlay {
    unit: Handle,
    owner: Owner,
    buffer: Mutex<Buffer>,
}

impl Overlay {
    fn new(unit: Handle, owner: Owner, contents: String) -> Self {
        Overlay {
            unit,
            owner,
            buffer: Mutex::new(Buffer {
                committed: contents.clone(),
                contents,
                closed: false,
            }),
        }
    }

    pub fn unit(&self) -> &Handle {
        &self.unit
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().contents.clone()
    }

    pub fn set_contents(&self, contents: impl Into<String>) -> Result<(), WorkingCopyError> {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return Err(WorkingCopyError::Closed(self.unit.to_string()));
        }
        buffer.contents = contents.into();
        Ok(())
    }

    pub fn has_unsaved_changes(&self) -> bool {
        let buffer = self.buffer.lock();
        buffer.contents != buffer.committed
    }

    /// Mark the current contents as saved and return them for writing.
    pub fn commit(&self) -> Result<String, WorkingCopyError> {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return Err(WorkingCopyError::Closed(self.unit.to_string()));
        }
        buffer.committed = buffer.contents.clone();
        Ok(buffer.committed.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.lock().closed
    }

    /// Close the buffer, returning `(committed, contents)` as they were.
    fn close(&self) -> (String, String) {
        let mut buffer = self.buffer.lock();
        buffer.closed = true;
        (
            std::mem::take(&mut buffer.committed),
            std::mem::take(&mut buffer.contents),
        )
    }
}

struct Record {
    overlay: Arc<Overlay>,
    use_count: usize,
    problems: Option<Arc<dyn ProblemSink>>,
}

type RecordKey = (Handle, Owner);

pub struct WorkingCopyRegistry {
    records: Mutex<HashMap<RecordKey, Record>>,
    cache: Arc<ElementInfoCache>,
    diffs: Mutex<DiffEngine>,
    events: broadcast::Sender<StructureDiff>,
}

impl WorkingCopyRegistry {
    pub fn new(cache: Arc<ElementInfoCache>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        WorkingCopyRegistry {
            records: Mutex::new(HashMap::new()),
            cache,
            diffs: Mutex::new(DiffEngine::new()),
            events,
        }
    }

    /// Structure changes emitted when a primary working copy with unsaved
    /// changes is torn down.
    pub fn subscribe(&self) -> broadcast::Receiver<StructureDiff> {
        self.events.subscribe()
    }

    /// The working copy of `unit` for `owner`, created from `factory` on first
    /// use. Every call counts as one use to be released.
    pub fn acquire<F>(
        &self,
        unit: &Handle,
        owner: &Owner,
        problems: Option<Arc<dyn ProblemSink>>,
        factory: F,
    ) -> Result<Arc<Overlay>, WorkingCopyError>
    where
        F: FnOnce() -> anyhow::Result<String>,
    {
        if unit.kind() != ElementKind::Unit {
            return Err(WorkingCopyError::NotAUnit(unit.to_string()));
        }
        let key = (unit.clone(), owner.clone());
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(&key) {
            record.use_count += 1;
            if problems.is_some() {
                record.problems = problems;
            }
            return Ok(record.overlay.clone());
        }

        let contents = factory().map_err(|e| WorkingCopyError::Factory {
            unit: unit.to_string(),
            reason: format!("{:#}", e),
        })?;
        let overlay = Arc::new(Overlay::new(unit.clone(), owner.clone(), contents));
        records.insert(
            key,
            Record {
                overlay: overlay.clone(),
                use_count: 1,
                problems,
            },
        );
        // the shared structure follows the primary overlay from now on
        if owner.is_primary() {
            self.cache.remove(unit);
            self.cache.pin(unit);
        }
        tracing::debug!("Created working copy of {} for {}", unit, owner);
        Ok(overlay)
    }

    /// Current contents of the primary working copy of `unit`, if one is open.
    pub fn primary_contents(&self, unit: &Handle) -> Option<String> {
        self.records
            .lock()
            .get(&(unit.clone(), Owner::primary()))
            .map(|r| r.overlay.contents())
    }

    pub fn use_count(&self, unit: &Handle, owner: &Owner) -> usize {
        self.records
            .lock()
            .get(&(unit.clone(), owner.clone()))
            .map_or(0, |r| r.use_count)
    }

    pub fn working_copies(&self, owner: &Owner) -> Vec<Arc<Overlay>> {
        let mut overlays: Vec<Arc<Overlay>> = self
            .records
            .lock()
            .iter()
            .filter(|((_, o), _)| o == owner)
            .map(|(_, record)| record.overlay.clone())
            .collect();
        overlays.sort_by(|a, b| a.unit.cmp(&b.unit));
        overlays
    }

    pub fn problem_sink(&self, overlay: &Overlay) -> Option<Arc<dyn ProblemSink>> {
        self.records
            .lock()
            .get(&(overlay.unit.clone(), overlay.owner.clone()))
            .and_then(|r| r.problems.clone())
    }

    /// Drop one use. Returns the remaining count; at zero the working copy is
    /// torn down.
    pub fn release(&self, overlay: &Overlay) -> Result<usize, WorkingCopyError> {
        let key = (overlay.unit.clone(), overlay.owner.clone());
        let remaining = {
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(&key).filter(|r| std::ptr::eq(Arc::as_ptr(&r.overlay), overlay)) else {
                return Err(WorkingCopyError::NotAWorkingCopy(overlay.unit.to_string()));
            };
            record.use_count -= 1;
            let remaining = record.use_count;
            if remaining == 0 {
                records.remove(&key);
            }
            remaining
        };
        if remaining == 0 {
            self.teardown(overlay);
        }
        Ok(remaining)
    }

    /// Tear the working copy down whatever its use count.
    pub fn discard(&self, overlay: &Overlay) -> Result<(), WorkingCopyError> {
        let key = (overlay.unit.clone(), overlay.owner.clone());
        {
            let mut records = self.records.lock();
            let owned = records
                .get(&key)
                .is_some_and(|r| std::ptr::eq(Arc::as_ptr(&r.overlay), overlay));
            if !owned {
                return Err(WorkingCopyError::NotAWorkingCopy(overlay.unit.to_string()));
            }
            records.remove(&key);
        }
        self.teardown(overlay);
        Ok(())
    }

    /// Runs once the record is gone, so no other thread can reach the overlay
    /// through the registry any more.
    fn teardown(&self, overlay: &Overlay) {
        let (committed, contents) = overlay.close();
        tracing::debug!("Discarded working copy of {} for {}", overlay.unit, overlay.owner);
        if !overlay.owner.is_primary() {
            return;
        }
        self.cache.remove(&overlay.unit);
        self.cache.unpin(&overlay.unit);
        if committed == contents {
            return;
        }
        // the unit's structure reverts from the edited text to the saved one
        let diff = self.diffs.lock().compute_diff(
            &overlay.unit.to_string(),
            &unit_structure(&contents),
            &unit_structure(&committed),
        );
        if diff.is_empty() {
            return;
        }
        if self.events.send(diff).is_err() {
            tracing::debug!("No listeners for structure changes of {}", overlay.unit);
        }
    }

    /// Rebuild the unit's structure from the overlay's current contents. A
    /// primary overlay replaces whatever the cache holds for the unit while
    /// its package is open; other owners only get the result back.
    pub fn reconcile(&self, overlay: &Overlay) -> GroveResult<Arc<ElementInfo>> {
        let contents = overlay.contents();
        let built = unit_infos(&overlay.unit, &contents);
        let shared = overlay.owner.is_primary()
            && overlay.unit.parent().is_none_or(|p| self.cache.contains(&p));
        let info = if shared {
            self.cache.publish(&overlay.unit, built, true)
        } else {
            built.get(&overlay.unit).cloned()
        }
        .ok_or_else(|| GroveError::DoesNotExist(overlay.unit.to_string()))?;
        if info.children.is_empty() && !contents.trim().is_empty() {
            if let Some(sink) = self.problem_sink(overlay) {
                sink.report(&overlay.unit, "no type declaration found");
            }
        }
        Ok(info)
    }
}
