use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::RwLock;

use super::{CounterHandle, CounterPoint, CounterSource, CounterType, SourceError};

struct Entry {
    section_type: String,
    section_ident: String,
    name: String,
    description: String,
    declared_type: CounterType,
    value: Arc<AtomicU64>,
}

impl Entry {
    fn matches(&self, section_type: &str, section_ident: &str, name: &str) -> bool {
        self.section_type == section_type && self.section_ident == section_ident && self.name == name
    }

    fn snapshot(&self) -> CounterPoint {
        CounterPoint {
            section_type: self.section_type.clone(),
            section_ident: self.section_ident.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            declared_type: self.declared_type.clone(),
            // Single-word read: writers may race with us, and we accept whatever we observe.
            value: self.value.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    entries: RwLock<Vec<Entry>>,
    generation: AtomicU64,
    available: AtomicBool,
}

/// An in-process counter source.
///
/// Counters are registered once and then updated by the owning application through the returned `Arc<AtomicU64>`.
/// Cloning the source is cheap, and all clones share the same counter set.
///
/// The source can be marked unavailable, which makes [`open`](CounterSource::open) fail, and can be invalidated, which
/// makes every outstanding handle report [`SourceError::Stale`].
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<Inner>,
}

impl MemorySource {
    /// Creates an empty, available `MemorySource`.
    pub fn new() -> Self {
        MemorySource {
            inner: Arc::new(Inner {
                entries: RwLock::new(Vec::new()),
                generation: AtomicU64::new(0),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Registers a `uint64` counter, returning the shared value cell.
    ///
    /// If a counter with the same section type, section identifier and name already exists, its value cell is
    /// returned instead and the description is left untouched.
    pub fn register(
        &self,
        section_type: &str,
        section_ident: &str,
        name: &str,
        description: &str,
    ) -> Arc<AtomicU64> {
        let point = CounterPoint::new(section_type, name, 0)
            .with_ident(section_ident)
            .with_description(description);
        self.insert(point)
    }

    /// Registers a counter from a template point, returning the shared value cell.
    ///
    /// The template's value becomes the initial value. Existing counters are matched the same way as in
    /// [`register`](MemorySource::register).
    pub fn insert(&self, point: CounterPoint) -> Arc<AtomicU64> {
        let mut entries = self.inner.entries.write();
        if let Some(existing) = entries
            .iter()
            .find(|e| e.matches(&point.section_type, &point.section_ident, &point.name))
        {
            return Arc::clone(&existing.value);
        }

        let value = Arc::new(AtomicU64::new(point.value));
        entries.push(Entry {
            section_type: point.section_type,
            section_ident: point.section_ident,
            name: point.name,
            description: point.description,
            declared_type: point.declared_type,
            value: Arc::clone(&value),
        });
        value
    }

    /// Returns the number of registered counters.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Returns `true` if no counters are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Sets whether or not the source can currently be opened.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Release);
    }

    /// Invalidates all outstanding handles.
    pub fn invalidate(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        MemorySource::new()
    }
}

impl CounterSource for MemorySource {
    type Handle = MemoryHandle;

    fn open(&mut self) -> Result<Self::Handle, SourceError> {
        if !self.inner.available.load(Ordering::Acquire) {
            return Err(SourceError::Unavailable { reason: "in-memory source marked unavailable".into() });
        }

        Ok(MemoryHandle {
            inner: Arc::clone(&self.inner),
            generation: self.inner.generation.load(Ordering::Acquire),
        })
    }
}

/// Handle to an opened [`MemorySource`].
pub struct MemoryHandle {
    inner: Arc<Inner>,
    generation: u64,
}

impl CounterHandle for MemoryHandle {
    fn points(&mut self) -> Result<Vec<CounterPoint>, SourceError> {
        if self.inner.generation.load(Ordering::Acquire) != self.generation {
            return Err(SourceError::Stale);
        }

        Ok(self.inner.entries.read().iter().map(Entry::snapshot).collect())
    }
}
