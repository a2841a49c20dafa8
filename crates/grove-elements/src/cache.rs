//! Bounded, shared cache of element infos
//!
//! Infos are built lazily and staged in a per-thread scratch map while a
//! subtree is being opened. Only when the outermost open succeeds is the
//! whole subtree published, atomically and at most once per handle. A failed
//! open discards everything it staged.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use grove_core::{GroveError, GroveResult};
use lru::LruCache;
use parking_lot::Mutex;

use crate::handle::Handle;
use crate::info::{BuiltInfos, ElementInfo};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Produces the info of an element whose parent is already open.
pub trait InfoBuilder: Send + Sync {
    /// The result must contain `handle` and may contain descendants built
    /// along the way. Missing or unreadable content is `DoesNotExist`.
    fn build(&self, handle: &Handle) -> GroveResult<BuiltInfos>;
}

#[derive(Default)]
struct Scratch {
    depth: usize,
    infos: BuiltInfos,
}

thread_local! {
    /// Staged infos per cache, for the opens running on this thread.
    static SCRATCH: RefCell<HashMap<u64, Scratch>> = RefCell::new(HashMap::new());
}

fn staged(cache_id: u64, handle: &Handle) -> Option<Arc<ElementInfo>> {
    SCRATCH.with(|scratch| {
        scratch
            .borrow()
            .get(&cache_id)
            .and_then(|s| s.infos.get(handle).cloned())
    })
}

fn stage(cache_id: u64, infos: BuiltInfos) {
    SCRATCH.with(|scratch| {
        if let Some(s) = scratch.borrow_mut().get_mut(&cache_id) {
            s.infos.extend(infos);
        }
    });
}

/// One level of opening. Dropping the outermost scope clears the scratch map,
/// so staged infos never outlive a failed open.
struct OpenScope {
    cache_id: u64,
    outermost: bool,
}

impl OpenScope {
    fn enter(cache_id: u64) -> Self {
        SCRATCH.with(|scratch| {
            let mut scratch = scratch.borrow_mut();
            let s = scratch.entry(cache_id).or_default();
            s.depth += 1;
            OpenScope {
                cache_id,
                outermost: s.depth == 1,
            }
        })
    }

    fn take(&self) -> BuiltInfos {
        SCRATCH.with(|scratch| {
            scratch
                .borrow_mut()
                .get_mut(&self.cache_id)
                .map(|s| std::mem::take(&mut s.infos))
                .unwrap_or_default()
        })
    }
}

impl Drop for OpenScope {
    fn drop(&mut self) {
        SCRATCH.with(|scratch| {
            let mut scratch = scratch.borrow_mut();
            if let Some(s) = scratch.get_mut(&self.cache_id) {
                s.depth = s.depth.saturating_sub(1);
                if s.depth == 0 {
                    scratch.remove(&self.cache_id);
                }
            }
        });
    }
}

struct CacheInner {
    infos: LruCache<Handle, Arc<ElementInfo>>,
    /// Pin counts. A pinned element, and every ancestor of one, is never
    /// evicted.
    pinned: HashMap<Handle, usize>,
}

impl CacheInner {
    /// Cached elements of the subtree rooted at `handle`, descendants before
    /// their parents.
    fn subtree(&self, handle: &Handle) -> Vec<Handle> {
        let mut order = Vec::new();
        let mut stack = vec![(handle.clone(), false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            let Some(info) = self.infos.peek(&current) else {
                continue;
            };
            let children = info.children.clone();
            stack.push((current, true));
            stack.extend(children.into_iter().rev().map(|child| (child, false)));
        }
        order
    }

    fn remove_subtree(&mut self, handle: &Handle) -> Option<Arc<ElementInfo>> {
        let mut removed = None;
        for current in self.subtree(handle) {
            let info = self.infos.pop(&current);
            if &current == handle {
                removed = info;
            }
        }
        removed
    }

    fn evictable(&self, handle: &Handle, exempt: &HashSet<Handle>) -> bool {
        self.subtree(handle)
            .iter()
            .all(|h| !exempt.contains(h) && !self.pinned.contains_key(h))
    }

    /// Evict least recently used subtrees until within `capacity`. When
    /// nothing can go, the cache stays over capacity.
    fn trim(&mut self, capacity: usize, exempt: &HashSet<Handle>) {
        while self.infos.len() > capacity {
            let victim = self
                .infos
                .iter()
                .rev()
                .map(|(handle, _)| handle)
                .find(|handle| self.evictable(handle, exempt))
                .cloned();
            let Some(victim) = victim else {
                tracing::debug!(
                    "Element cache over capacity ({} > {}); remaining infos are pinned",
                    self.infos.len(),
                    capacity
                );
                return;
            };
            let evicted = self.subtree(&victim);
            tracing::debug!("Evicting {} with {} infos", victim, evicted.len());
            for handle in evicted {
                self.infos.pop(&handle);
            }
        }
    }
}

pub struct ElementInfoCache {
    id: u64,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl ElementInfoCache {
    pub fn new(capacity: usize) -> Self {
        ElementInfoCache {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                infos: LruCache::unbounded(),
                pinned: HashMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Info of `handle` if it is open, including infos this thread is still
    /// staging. Does not affect recency.
    pub fn get_info(&self, handle: &Handle) -> Option<Arc<ElementInfo>> {
        staged(self.id, handle).or_else(|| self.inner.lock().infos.peek(handle).cloned())
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.inner.lock().infos.contains(handle)
    }

    /// Info of `handle`, opening it (and any unopened ancestors) with
    /// `builder` when absent.
    pub fn get_or_open(&self, handle: &Handle, builder: &dyn InfoBuilder) -> GroveResult<Arc<ElementInfo>> {
        if let Some(info) = staged(self.id, handle) {
            return Ok(info);
        }
        if let Some(info) = self.inner.lock().infos.get(handle).cloned() {
            return Ok(info);
        }

        let scope = OpenScope::enter(self.id);
        let info = match self.open_staged(handle, builder) {
            Ok(info) => info,
            Err(e) => {
                if scope.outermost {
                    tracing::debug!("Failed to open {}: {}; discarding staged infos", handle, e);
                }
                return Err(e);
            }
        };
        if !scope.outermost {
            return Ok(info);
        }
        let built = scope.take();
        Ok(self.publish(handle, built, false).unwrap_or(info))
    }

    fn open_staged(&self, handle: &Handle, builder: &dyn InfoBuilder) -> GroveResult<Arc<ElementInfo>> {
        if let Some(parent) = handle.parent() {
            let parent_info = match self.get_info(&parent) {
                Some(info) => info,
                None => self.get_or_open(&parent, builder)?,
            };
            // opening the parent may have built this element already
            if let Some(info) = staged(self.id, handle) {
                return Ok(info);
            }
            if !parent_info.children.contains(handle) {
                return Err(GroveError::DoesNotExist(handle.to_string()));
            }
        }

        let built = builder.build(handle)?;
        let Some(info) = built.get(handle).cloned() else {
            return Err(GroveError::DoesNotExist(handle.to_string()));
        };
        stage(self.id, built);
        Ok(info)
    }

    /// Merge the infos built while opening `opened` into the cache.
    ///
    /// If `opened` is already cached and `force_replace` is false, the cached
    /// info wins and `infos` is dropped. With `force_replace` the cached
    /// children are closed first. Other handles of `infos` that are already
    /// cached keep their info.
    pub fn publish(&self, opened: &Handle, infos: BuiltInfos, force_replace: bool) -> Option<Arc<ElementInfo>> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.infos.peek(opened).cloned() {
            if !force_replace {
                tracing::debug!("{} was opened concurrently; keeping the published info", opened);
                return Some(existing);
            }
            for child in &existing.children {
                inner.remove_subtree(child);
            }
        }

        let result = infos.get(opened).cloned();
        // the nearest ancestor not built here must still be open, otherwise
        // the subtree would hang off nothing
        let mut anchor = opened.parent();
        while let Some(ancestor) = anchor.as_ref().filter(|a| infos.contains_key(*a)) {
            anchor = ancestor.parent();
        }
        if let Some(ancestor) = anchor.filter(|a| !inner.infos.contains(a)) {
            tracing::debug!("{} was closed while opening {}; not publishing", ancestor, opened);
            return result;
        }

        let mut ordered: Vec<(Handle, Arc<ElementInfo>)> = infos.into_iter().collect();
        // archive roots go in first so evicting one of their children never
        // finds the root missing; everything else parents first
        ordered.sort_by_key(|(handle, _)| (!handle.is_archive_root(), handle.depth()));

        let mut fresh = HashSet::with_capacity(ordered.len());
        for (handle, info) in ordered {
            if &handle != opened && inner.infos.contains(&handle) {
                continue;
            }
            inner.infos.put(handle.clone(), info);
            fresh.insert(handle);
        }
        inner.trim(self.capacity, &fresh);
        result
    }

    /// Close `handle` and every cached descendant.
    pub fn remove(&self, handle: &Handle) -> Option<Arc<ElementInfo>> {
        self.inner.lock().remove_subtree(handle)
    }

    /// Keep `handle` (and its ancestors) out of eviction until unpinned.
    pub fn pin(&self, handle: &Handle) {
        *self.inner.lock().pinned.entry(handle.clone()).or_insert(0) += 1;
    }

    pub fn unpin(&self, handle: &Handle) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.pinned.get_mut(handle) {
            *count -= 1;
            if *count == 0 {
                inner.pinned.remove(handle);
            }
        }
        let capacity = self.capacity;
        inner.trim(capacity, &HashSet::new());
    }

    pub fn is_pinned(&self, handle: &Handle) -> bool {
        self.inner.lock().pinned.contains_key(handle)
    }

    pub fn clear(&self) {
        self.inner.lock().infos.clear();
    }
}
