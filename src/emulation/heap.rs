//! Managed heap for the emulated runtime.
//!
//! This module provides [`ManagedHeap`], which stores every object the emulated runtime
//! allocates. Objects live behind an [`Arc`] whose address is the object's raw handle, so
//! an [`ObjectPtr`] stays valid and never moves for the lifetime of the heap. No memory is
//! reclaimed: collections only update statistics, which is the same guarantee a pinned
//! object gets from a moving collector.
//!
//! # Object Layout
//!
//! - **Data** - Instance fields of a reference type, or the payload of a boxed value
//! - **String** - Immutable UTF-16 code units
//! - **Array** - Element class, element size and a contiguous element buffer
//! - **Type** - A reflection `System.Type` instance naming a class
//!
//! Reference-typed slots inside a payload hold the referenced object's address as a
//! native-endian `usize`, zero for null.
//!
//! # Interior Mutability
//!
//! Payload bytes are reached through raw pointers, exactly like the memory of a native
//! runtime. [`RawBuffer`] owns the bytes and hands out stable addresses; the size of a
//! buffer is fixed at allocation.

use std::{
    cell::UnsafeCell,
    collections::HashMap,
    ffi::c_void,
    fmt,
    ptr::NonNull,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use dashmap::DashMap;

use crate::runtime::{ClassPtr, ObjectPtr};

/// Size of a reference slot inside a payload.
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// A fixed-size byte buffer with stable, shareable addresses.
pub struct RawBuffer {
    bytes: UnsafeCell<Box<[u8]>>,
}

// Access is by raw pointer, mirroring unmanaged runtime memory.
unsafe impl Send for RawBuffer {}
unsafe impl Sync for RawBuffer {}

impl RawBuffer {
    /// Allocates `len` zeroed bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        RawBuffer {
            bytes: UnsafeCell::new(vec![0u8; len].into_boxed_slice()),
        }
    }

    /// Allocates a buffer holding a copy of `data`.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        RawBuffer {
            bytes: UnsafeCell::new(data.to_vec().into_boxed_slice()),
        }
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        // SAFETY: the length of the boxed slice never changes after allocation.
        unsafe { (&(*self.bytes.get())).len() }
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address of `offset` bytes into the buffer, null when out of range.
    #[must_use]
    pub fn addr(&self, offset: usize) -> *mut c_void {
        if offset > self.len() {
            return std::ptr::null_mut();
        }
        // SAFETY: offset is within (or one past) the allocation.
        unsafe { (*self.bytes.get()).as_mut_ptr().add(offset).cast() }
    }

    /// Copies `len` bytes starting at `offset`.
    ///
    /// # Panics
    /// Panics if the range lies outside the buffer.
    #[must_use]
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= self.len(), "read outside of payload");
        // SAFETY: bounds checked above; the emulated runtime does not run concurrent
        // writers against the same slot.
        unsafe { (&(*self.bytes.get()))[offset..offset + len].to_vec() }
    }

    /// Overwrites bytes starting at `offset`.
    ///
    /// # Panics
    /// Panics if the range lies outside the buffer.
    pub fn write(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len(), "write outside of payload");
        // SAFETY: bounds checked above.
        unsafe { (&mut (*self.bytes.get()))[offset..offset + data.len()].copy_from_slice(data) }
    }

    /// Reads a reference slot.
    #[must_use]
    pub fn read_ref(&self, offset: usize) -> Option<ObjectPtr> {
        let raw = self.read(offset, POINTER_SIZE);
        let mut word = [0u8; POINTER_SIZE];
        word.copy_from_slice(&raw);
        ObjectPtr::from_ptr(usize::from_ne_bytes(word) as *mut c_void)
    }

    /// Writes a reference slot.
    pub fn write_ref(&self, offset: usize, value: Option<ObjectPtr>) {
        let word = value.map_or(0, ObjectPtr::addr);
        self.write(offset, &word.to_ne_bytes());
    }
}

impl fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawBuffer({} bytes)", self.len())
    }
}

/// Storage of one heap object.
#[derive(Debug)]
pub enum ObjectPayload {
    /// Instance fields or a boxed value
    Data(RawBuffer),
    /// UTF-16 string contents
    String(Vec<u16>),
    /// Single-dimensional array
    Array {
        /// Size of one element slot in bytes
        element_size: usize,
        /// Number of elements
        len: usize,
        /// Element storage
        data: RawBuffer,
    },
    /// Reflection type object
    Type(ClassPtr),
}

/// An object on the emulated managed heap.
#[derive(Debug)]
pub struct HeapObject {
    /// Runtime class of the object
    pub class: ClassPtr,
    /// Object storage
    pub payload: ObjectPayload,
}

impl HeapObject {
    /// Bytes accounted for this object in heap statistics.
    #[must_use]
    pub fn footprint(&self) -> u64 {
        let payload = match &self.payload {
            ObjectPayload::Data(data) => data.len(),
            ObjectPayload::String(units) => units.len() * 2,
            ObjectPayload::Array { data, .. } => data.len(),
            ObjectPayload::Type(_) => POINTER_SIZE,
        };
        // Object header: vtable and sync block.
        (payload + 2 * POINTER_SIZE) as u64
    }
}

/// Snapshot of collector statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStats {
    /// Number of forced collections
    pub collections: u64,
    /// Live strong handles
    pub handles: usize,
    /// Live pinned handles
    pub pinned: usize,
}

/// Managed heap with identity-stable objects.
pub struct ManagedHeap {
    objects: DashMap<usize, Arc<HeapObject>>,
    used: AtomicU64,
    handles: Mutex<HashMap<u32, (ObjectPtr, bool)>>,
    next_handle: AtomicU32,
    collections: AtomicU64,
}

impl Default for ManagedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedHeap {
    /// Granularity of the reserved heap size.
    pub const SEGMENT_SIZE: u64 = 1 << 20;

    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        ManagedHeap {
            objects: DashMap::new(),
            used: AtomicU64::new(0),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
            collections: AtomicU64::new(0),
        }
    }

    /// Allocates an object and returns its handle.
    pub fn alloc(&self, class: ClassPtr, payload: ObjectPayload) -> ObjectPtr {
        let object = Arc::new(HeapObject { class, payload });
        self.used.fetch_add(object.footprint(), Ordering::Relaxed);

        let ptr = ObjectPtr::from_non_null(NonNull::from(object.as_ref()).cast());
        self.objects.insert(ptr.addr(), object);
        ptr
    }

    /// Looks up an object by handle.
    #[must_use]
    pub fn get(&self, ptr: ObjectPtr) -> Option<Arc<HeapObject>> {
        self.objects.get(&ptr.addr()).map(|entry| entry.value().clone())
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the heap holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Bytes in use by live objects.
    #[must_use]
    pub fn used_size(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Bytes reserved, rounded up to whole segments.
    #[must_use]
    pub fn heap_size(&self) -> u64 {
        let used = self.used_size();
        used.div_ceil(Self::SEGMENT_SIZE).max(1) * Self::SEGMENT_SIZE
    }

    /// Creates a strong handle.
    pub fn new_handle(&self, object: ObjectPtr, pinned: bool) -> u32 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        lock!(self.handles).insert(handle, (object, pinned));
        handle
    }

    /// Releases a strong handle, ignoring unknown handles.
    pub fn free_handle(&self, handle: u32) {
        lock!(self.handles).remove(&handle);
    }

    /// Target of a strong handle.
    #[must_use]
    pub fn handle_target(&self, handle: u32) -> Option<ObjectPtr> {
        lock!(self.handles).get(&handle).map(|(object, _)| *object)
    }

    /// Records a forced collection.
    pub fn collect(&self, generation: i32) {
        let count = self.collections.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(generation, count, live = self.len(), "emulated collection");
    }

    /// Collector statistics.
    #[must_use]
    pub fn stats(&self) -> GcStats {
        let handles = lock!(self.handles);
        GcStats {
            collections: self.collections.load(Ordering::Relaxed),
            handles: handles.len(),
            pinned: handles.values().filter(|(_, pinned)| *pinned).count(),
        }
    }
}

impl fmt::Debug for ManagedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedHeap")
            .field("objects", &self.len())
            .field("used", &self.used_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;

    fn dummy_class() -> ClassPtr {
        static ANCHOR: u8 = 0;
        ClassPtr::from_non_null(NonNull::from(&ANCHOR).cast())
    }

    #[test]
    fn test_raw_buffer_read_write() {
        let buffer = RawBuffer::zeroed(16);
        buffer.write(4, &42i32.to_ne_bytes());
        assert_eq!(buffer.read(4, 4), 42i32.to_ne_bytes().to_vec());
        assert_eq!(buffer.read(0, 4), vec![0, 0, 0, 0]);
        assert!(buffer.addr(17).is_null());
    }

    #[test]
    fn test_reference_slots() {
        let heap = ManagedHeap::new();
        let target = heap.alloc(dummy_class(), ObjectPayload::String(vec![0x41]));

        let buffer = RawBuffer::zeroed(POINTER_SIZE * 2);
        assert_eq!(buffer.read_ref(0), None);
        buffer.write_ref(POINTER_SIZE, Some(target));
        assert_eq!(buffer.read_ref(POINTER_SIZE), Some(target));
        buffer.write_ref(POINTER_SIZE, None);
        assert_eq!(buffer.read_ref(POINTER_SIZE), None);
    }

    #[test]
    fn test_alloc_is_stable() {
        let heap = ManagedHeap::new();
        let first = heap.alloc(dummy_class(), ObjectPayload::Data(RawBuffer::zeroed(8)));
        for _ in 0..64 {
            heap.alloc(dummy_class(), ObjectPayload::Data(RawBuffer::zeroed(8)));
        }
        let object = heap.get(first).unwrap();
        assert_eq!(Arc::as_ptr(&object) as usize, first.addr());
        assert_eq!(heap.len(), 65);
        assert!(heap.heap_size() >= heap.used_size());
    }

    #[test]
    fn test_handles() {
        let heap = ManagedHeap::new();
        let object = heap.alloc(dummy_class(), ObjectPayload::Data(RawBuffer::zeroed(4)));

        let pinned = heap.new_handle(object, true);
        let weakish = heap.new_handle(object, false);
        assert_eq!(heap.handle_target(pinned), Some(object));
        assert_eq!(heap.stats().pinned, 1);
        assert_eq!(heap.stats().handles, 2);

        heap.free_handle(pinned);
        heap.free_handle(pinned);
        assert_eq!(heap.handle_target(pinned), None);
        assert_eq!(heap.handle_target(weakish), Some(object));

        heap.collect(0);
        assert_eq!(heap.stats().collections, 1);
    }
}
