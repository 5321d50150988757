//! Vertex array cache
//!
//! Vulkan binds vertex and index buffers per draw; the legacy API captures
//! them in vertex array objects. The cache maps each distinct binding
//! combination to one vertex array so repeated draws rebind an existing
//! object instead of re-specifying attributes.
//!
//! Entries are removed when a buffer they reference is destroyed or its
//! memory is freed, through one-shot listeners registered on the buffer
//! ([`DestroyNotifier`]). Nothing else evicts entries.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::backends::gl::driver::{GlDriver, IndexType, VertexArrayName};
use crate::backends::gl::GlState;
use crate::core::handles::BufferKey;

/// One bound vertex buffer as seen by a draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    /// Binding slot of the vertex layout
    pub slot: u32,
    /// Bound buffer
    pub buffer: BufferKey,
    /// Offset passed at bind time
    pub offset: u64,
}

/// Bound index buffer as seen by an indexed draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBinding {
    /// Bound buffer
    pub buffer: BufferKey,
    /// Offset passed at bind time
    pub offset: u64,
    /// Index width
    pub index_type: IndexType,
}

/// Lookup key of one vertex array
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeometryKey {
    /// Identity of the pipeline's vertex layout
    pub layout: u64,
    /// Bindings used by the layout, ordered by slot
    pub vertex: Vec<VertexBinding>,
    /// Index binding of indexed draws
    pub index: Option<IndexBinding>,
}

impl GeometryKey {
    /// Whether the key references `buffer`
    pub fn references(&self, buffer: BufferKey) -> bool {
        self.vertex.iter().any(|binding| binding.buffer == buffer)
            || self.index.is_some_and(|index| index.buffer == buffer)
    }

    /// Buffers referenced by the key, vertex buffers first
    pub fn buffers(&self) -> impl Iterator<Item = BufferKey> + '_ {
        self.vertex
            .iter()
            .map(|binding| binding.buffer)
            .chain(self.index.map(|index| index.buffer))
    }
}

type Listener = Box<dyn FnOnce(&mut GlState) + Send>;

/// One-shot listeners run when an object goes away.
///
/// Listeners run with the context lock held and receive the context state,
/// so owners don't keep back-pointers to the caches that watch them.
#[derive(Default)]
pub struct DestroyNotifier {
    listeners: Mutex<Vec<Listener>>,
}

impl DestroyNotifier {
    /// Create a notifier with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener
    pub fn register(&self, listener: impl FnOnce(&mut GlState) + Send + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Run and drop every listener
    pub fn fire(&self, state: &mut GlState) {
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            listener(state);
        }
    }

    /// Number of pending listeners
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listener is pending
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl std::fmt::Debug for DestroyNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestroyNotifier")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Vertex arrays keyed by binding combination
#[derive(Debug, Default)]
pub struct GeometryCache {
    entries: HashMap<GeometryKey, VertexArrayName>,
    watched: HashSet<BufferKey>,
    hits: u64,
    misses: u64,
    warn_threshold: Option<usize>,
    warned: bool,
}

impl GeometryCache {
    /// Empty cache; `warn_threshold` is the size that logs a one-time warning
    pub fn new(warn_threshold: Option<usize>) -> Self {
        Self {
            warn_threshold,
            ..Self::default()
        }
    }

    /// Live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups answered from the cache
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that needed a new vertex array
    pub const fn misses(&self) -> u64 {
        self.misses
    }

    /// Find the vertex array for `key`, counting the hit or miss
    pub fn lookup(&mut self, key: &GeometryKey) -> Option<VertexArrayName> {
        let found = self.entries.get(key).copied();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    /// Store a freshly built vertex array
    pub fn insert(&mut self, key: GeometryKey, vertex_array: VertexArrayName) {
        self.entries.insert(key, vertex_array);
        if let Some(threshold) = self.warn_threshold {
            if !self.warned && self.entries.len() >= threshold {
                self.warned = true;
                log::warn!(
                    "Vertex array cache reached {} entries; binding combinations are not being reused",
                    self.entries.len()
                );
            }
        }
    }

    /// Start watching a buffer; returns false if it already is watched.
    ///
    /// The caller registers the destroy listeners when this returns true.
    pub fn watch(&mut self, buffer: BufferKey) -> bool {
        self.watched.insert(buffer)
    }

    /// Remove every entry referencing `buffer`, returning the orphaned arrays
    pub fn purge_buffer(&mut self, buffer: BufferKey) -> Vec<VertexArrayName> {
        self.watched.remove(&buffer);
        self.purge_where(|key| key.references(buffer))
    }

    /// Remove every entry built for a vertex layout
    pub fn purge_layout(&mut self, layout: u64) -> Vec<VertexArrayName> {
        self.purge_where(|key| key.layout == layout)
    }

    fn purge_where(&mut self, matches: impl Fn(&GeometryKey) -> bool) -> Vec<VertexArrayName> {
        let mut removed = Vec::new();
        self.entries.retain(|key, vertex_array| {
            if matches(key) {
                removed.push(*vertex_array);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            log::debug!("Purged {} vertex arrays", removed.len());
        }
        removed
    }

    /// Delete every vertex array
    pub fn clear(&mut self, driver: &mut dyn GlDriver) {
        for (_, vertex_array) in self.entries.drain() {
            driver.delete_vertex_array(vertex_array);
        }
        self.watched.clear();
    }
}

impl GlState {
    /// Drop cached vertex arrays that reference a dying buffer
    pub fn purge_buffer(&mut self, buffer: BufferKey) {
        for vertex_array in self.geometry.purge_buffer(buffer) {
            self.forget_vertex_array(vertex_array);
            self.driver.delete_vertex_array(vertex_array);
        }
    }

    /// Drop cached vertex arrays built for a destroyed pipeline
    pub fn purge_layout(&mut self, layout: u64) {
        for vertex_array in self.geometry.purge_layout(layout) {
            self.forget_vertex_array(vertex_array);
            self.driver.delete_vertex_array(vertex_array);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::noop::NoopDriver;
    use crate::backends::Capabilities;
    use slotmap::SlotMap;

    fn keys(count: usize) -> Vec<BufferKey> {
        let mut map: SlotMap<BufferKey, ()> = SlotMap::with_key();
        (0..count).map(|_| map.insert(())).collect()
    }

    fn key(layout: u64, buffer: BufferKey, offset: u64) -> GeometryKey {
        GeometryKey {
            layout,
            vertex: vec![VertexBinding {
                slot: 0,
                buffer,
                offset,
            }],
            index: None,
        }
    }

    #[test]
    fn test_lookup_counts_hits_and_misses() {
        let buffers = keys(1);
        let mut cache = GeometryCache::new(None);
        let k = key(1, buffers[0], 0);

        assert_eq!(cache.lookup(&k), None);
        cache.insert(k.clone(), VertexArrayName(5));
        assert_eq!(cache.lookup(&k), Some(VertexArrayName(5)));
        assert_eq!(cache.lookup(&key(1, buffers[0], 16)), None);
        assert_eq!((cache.hits(), cache.misses()), (1, 2));
    }

    #[test]
    fn test_purge_by_buffer_and_layout() {
        let buffers = keys(2);
        let mut cache = GeometryCache::new(None);
        cache.insert(key(1, buffers[0], 0), VertexArrayName(1));
        cache.insert(key(1, buffers[1], 0), VertexArrayName(2));
        cache.insert(key(2, buffers[1], 0), VertexArrayName(3));

        assert_eq!(cache.purge_buffer(buffers[0]), vec![VertexArrayName(1)]);
        assert_eq!(cache.len(), 2);

        let mut removed = cache.purge_layout(1);
        removed.sort();
        assert_eq!(removed, vec![VertexArrayName(2)]);
        assert_eq!(cache.lookup(&key(2, buffers[1], 0)), Some(VertexArrayName(3)));
    }

    #[test]
    fn test_watch_once_per_buffer() {
        let buffers = keys(1);
        let mut cache = GeometryCache::new(None);
        assert!(cache.watch(buffers[0]));
        assert!(!cache.watch(buffers[0]));
        cache.purge_buffer(buffers[0]);
        assert!(cache.watch(buffers[0]));
    }

    #[test]
    fn test_notifier_fires_once() {
        let buffers = keys(1);
        let (driver, _log) = NoopDriver::standalone();
        let mut state = GlState::new(Box::new(driver), Capabilities::all(), None);
        state.geometry.insert(key(1, buffers[0], 0), VertexArrayName(9));

        let notifier = DestroyNotifier::new();
        let buffer = buffers[0];
        notifier.register(move |state: &mut GlState| state.purge_buffer(buffer));
        assert_eq!(notifier.len(), 1);

        notifier.fire(&mut state);
        assert!(state.geometry.is_empty());
        assert!(notifier.is_empty());
        notifier.fire(&mut state);
    }
}
