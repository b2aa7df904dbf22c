//! An in-process foreign runtime.
//!
//! `LocalRuntime` implements [`Runtime`] without an interpreter: arrays are laid out exactly as
//! `jltensor-sys` describes, type descriptors are interned for the life of the runtime, and a
//! mark-and-sweep [`collect`](LocalRuntime::collect) reclaims every array that is neither
//! preserved nor rooted by an open frame on any thread. It backs the crate's tests and demos and
//! is useful to embedders that want to exercise marshalling code without booting Julia.
//!
//! Arrays are born rooted in the allocating thread's innermost frame, so allocating with no
//! frame open fails with [`RuntimeError::Unrooted`].

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::ptr::{self, NonNull};
use std::thread::{self, ThreadId};

use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::{
    datatype::ElementType,
    errors::{Result, RuntimeError},
    ffi::{self, jl_array_t, jl_datatype_t, jl_value_t},
    runtime::{self, Runtime, TypeRef},
};

const DATA_ALIGN: usize = 16;

thread_local! {
    static FAIL_NEXT: Cell<usize> = Cell::new(0);
}

/// Descriptor record a [`TypeRef`] of this runtime points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TypeEntry {
    code: u8,
    bits: u8,
    // 0 for element types, rank + 1 for array types
    rank: u16,
}

#[derive(Debug)]
struct Object {
    id: u64,
    array_type: TypeRef,
    words: usize,
    data: usize,
    layout: Layout,
    preserved: usize,
}

#[derive(Debug, Default)]
struct State {
    types: Vec<Box<TypeEntry>>,
    type_index: HashMap<TypeEntry, usize>,
    type_addrs: HashMap<usize, TypeEntry>,
    objects: HashMap<usize, Object>,
    frames: HashMap<ThreadId, Vec<Vec<usize>>>,
    next_id: u64,
    registrations: usize,
    closed: bool,
}

impl State {
    fn intern(&mut self, entry: TypeEntry) -> TypeRef {
        let addr = match self.type_index.get(&entry) {
            Some(addr) => *addr,
            None => {
                let boxed = Box::new(entry);
                let addr = &*boxed as *const TypeEntry as usize;
                self.types.push(boxed);
                self.type_index.insert(entry, addr);
                self.type_addrs.insert(addr, entry);
                self.registrations += 1;
                addr
            }
        };
        // interned entries are boxed and never freed, so `addr` is non-null and stable
        TypeRef::new(unsafe { NonNull::new_unchecked(addr as *mut jl_datatype_t) })
    }

    fn lookup(&self, ty: TypeRef) -> std::result::Result<TypeEntry, RuntimeError> {
        self.type_addrs
            .get(&(ty.as_ptr() as usize))
            .copied()
            .ok_or(RuntimeError::UnknownType)
    }

    fn free(&mut self, addr: usize) {
        if let Some(obj) = self.objects.remove(&addr) {
            unsafe {
                alloc::dealloc(obj.data as *mut u8, obj.layout);
                let words = ptr::slice_from_raw_parts_mut(addr as *mut usize, obj.words);
                drop(Box::from_raw(words));
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalRuntimeBuilder {
    name: Option<String>,
    max_array_bytes: Option<usize>,
}

impl LocalRuntimeBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Refuse any single array larger than `bytes`.
    pub fn max_array_bytes(mut self, bytes: usize) -> Self {
        self.max_array_bytes = Some(bytes);
        self
    }

    pub fn build(self) -> LocalRuntime {
        LocalRuntime {
            name: self.name.unwrap_or_else(|| "local".to_string()),
            max_array_bytes: self.max_array_bytes,
            state: Mutex::new(State::default()),
        }
    }
}

#[derive(Debug)]
pub struct LocalRuntime {
    name: String,
    max_array_bytes: Option<usize>,
    state: Mutex<State>,
}

static GLOBAL: Lazy<LocalRuntime> = Lazy::new(|| LocalRuntime::builder().name("global").build());

impl Default for LocalRuntime {
    fn default() -> Self {
        LocalRuntime::new()
    }
}

impl LocalRuntime {
    pub fn new() -> Self {
        LocalRuntime::builder().build()
    }

    pub fn builder() -> LocalRuntimeBuilder {
        LocalRuntimeBuilder::default()
    }

    /// The process-wide instance, installed as the current runtime on first call.
    pub fn install_global() -> Result<&'static LocalRuntime> {
        let rt: &'static LocalRuntime = &GLOBAL;
        runtime::install(rt)?;
        Ok(rt)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the next allocation on the calling thread fail.
    pub fn fail_next_allocation(&self) {
        FAIL_NEXT.with(|n| n.set(n.get() + 1));
    }

    /// Reclaims every array that is neither preserved nor rooted. Returns how many were freed.
    pub fn collect(&self) -> usize {
        let mut state = self.state.lock();
        let rooted: HashSet<usize> = state
            .frames
            .values()
            .flat_map(|stack| stack.iter().flatten().copied())
            .collect();
        let garbage: Vec<usize> = state
            .objects
            .iter()
            .filter(|(addr, obj)| obj.preserved == 0 && !rooted.contains(*addr))
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &garbage {
            state.free(*addr);
        }
        debug!("{}: collected {} arrays", self.name, garbage.len());
        garbage.len()
    }

    /// Allocation id of a live array, if `ptr` is one.
    pub fn object_id(&self, ptr: NonNull<jl_array_t>) -> Option<u64> {
        let state = self.state.lock();
        state.objects.get(&(ptr.as_ptr() as usize)).map(|obj| obj.id)
    }

    pub fn is_live(&self, id: u64) -> bool {
        self.state.lock().objects.values().any(|obj| obj.id == id)
    }

    /// Number of arrays not yet reclaimed.
    pub fn live_arrays(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn preserve_count(&self, ptr: NonNull<jl_array_t>) -> usize {
        let state = self.state.lock();
        state
            .objects
            .get(&(ptr.as_ptr() as usize))
            .map_or(0, |obj| obj.preserved)
    }

    /// Number of distinct type descriptors created so far.
    pub fn registrations(&self) -> usize {
        self.state.lock().registrations
    }
}

unsafe impl Runtime for LocalRuntime {
    fn element_type(&self, ty: ElementType) -> std::result::Result<TypeRef, RuntimeError> {
        if ty.bits == 0 || ty.bits % 8 != 0 {
            return Err(RuntimeError::UnknownElementType(ty));
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(RuntimeError::Closed);
        }
        Ok(state.intern(TypeEntry {
            code: ty.code(),
            bits: ty.bits,
            rank: 0,
        }))
    }

    fn apply_array_type(
        &self,
        element: TypeRef,
        rank: usize,
    ) -> std::result::Result<TypeRef, RuntimeError> {
        let mut state = self.state.lock();
        let entry = state.lookup(element)?;
        if entry.rank != 0 || rank > ffi::JL_ARRAY_NDIMS_MASK as usize {
            return Err(RuntimeError::UnknownType);
        }
        Ok(state.intern(TypeEntry {
            rank: rank as u16 + 1,
            ..entry
        }))
    }

    fn alloc_array(
        &self,
        array_type: TypeRef,
        dims: &[usize],
    ) -> std::result::Result<NonNull<jl_array_t>, RuntimeError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RuntimeError::Closed);
        }
        let entry = state.lookup(array_type)?;
        if entry.rank == 0 {
            return Err(RuntimeError::UnknownType);
        }
        let rank = entry.rank as usize - 1;
        if rank != dims.len() {
            return Err(RuntimeError::InvalidRank {
                expected: rank,
                found: dims.len(),
            });
        }
        let elem = ElementType::from_code(entry.code, entry.bits).ok_or(RuntimeError::UnknownType)?;

        let len = dims
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d))
            .ok_or(RuntimeError::AllocationFailed { bytes: usize::MAX })?;
        let bytes = len
            .checked_mul(elem.size())
            .ok_or(RuntimeError::AllocationFailed { bytes: usize::MAX })?;
        let injected = FAIL_NEXT.with(|n| {
            let pending = n.get();
            n.set(pending.saturating_sub(1));
            pending > 0
        });
        if injected || self.max_array_bytes.map_or(false, |max| bytes > max) {
            warn!("{}: refusing allocation of {} bytes", self.name, bytes);
            return Err(RuntimeError::AllocationFailed { bytes });
        }
        let thread = thread::current().id();
        if state.frames.get(&thread).map_or(true, |stack| stack.is_empty()) {
            return Err(RuntimeError::Unrooted);
        }

        let layout = Layout::from_size_align(bytes.max(1), DATA_ALIGN)
            .map_err(|_| RuntimeError::AllocationFailed { bytes })?;
        let data = unsafe { alloc::alloc_zeroed(layout) };
        if data.is_null() {
            return Err(RuntimeError::AllocationFailed { bytes });
        }

        let words = ffi::jl_array_header_words(dims.len());
        let header = Box::into_raw(vec![0usize; words].into_boxed_slice()) as *mut usize;
        let array = header as *mut jl_array_t;
        unsafe {
            (*array).data = data.cast();
            (*array).length = len;
            // data lives in its own allocation, as with a malloc'd buffer
            (*array).flags = ffi::jl_array_flags(2, dims.len() as u16) | ffi::JL_ARRAY_ISALIGNED;
            (*array).elsize = elem.size() as u16;
            (*array).offset = 0;
            let extents = ptr::addr_of_mut!((*array).nrows);
            for (k, d) in dims.iter().enumerate() {
                extents.add(k).write(*d);
            }
        }

        let addr = array as usize;
        let id = state.next_id;
        state.next_id += 1;
        state.objects.insert(
            addr,
            Object {
                id,
                array_type,
                words,
                data: data as usize,
                layout,
                preserved: 0,
            },
        );
        if let Some(frame) = state.frames.get_mut(&thread).and_then(|s| s.last_mut()) {
            frame.push(addr);
        }
        debug!(
            "{}: allocated Array{{{}, {}}} {:?} (#{})",
            self.name, elem, rank, dims, id
        );
        // `header` came from a live allocation
        Ok(unsafe { NonNull::new_unchecked(array) })
    }

    fn array_type_of(
        &self,
        array: NonNull<jl_array_t>,
    ) -> std::result::Result<TypeRef, RuntimeError> {
        let state = self.state.lock();
        state
            .objects
            .get(&(array.as_ptr() as usize))
            .map(|obj| obj.array_type)
            .ok_or(RuntimeError::UnknownArray)
    }

    fn push_frame(&self) {
        let mut state = self.state.lock();
        state
            .frames
            .entry(thread::current().id())
            .or_default()
            .push(Vec::new());
    }

    fn root(&self, value: NonNull<jl_value_t>) -> std::result::Result<(), RuntimeError> {
        let mut state = self.state.lock();
        let frame = state
            .frames
            .get_mut(&thread::current().id())
            .and_then(|stack| stack.last_mut())
            .ok_or(RuntimeError::Unrooted)?;
        frame.push(value.as_ptr() as usize);
        Ok(())
    }

    fn pop_frame(&self) {
        let mut state = self.state.lock();
        let thread = thread::current().id();
        let empty = match state.frames.get_mut(&thread) {
            Some(stack) => {
                stack.pop();
                stack.is_empty()
            }
            None => false,
        };
        if empty {
            state.frames.remove(&thread);
        }
    }

    fn preserve(&self, value: NonNull<jl_value_t>) {
        let mut state = self.state.lock();
        match state.objects.get_mut(&(value.as_ptr() as usize)) {
            Some(obj) => obj.preserved += 1,
            None => warn!("{}: preserving unknown object {:p}", self.name, value),
        }
    }

    fn release(&self, value: NonNull<jl_value_t>) {
        let mut state = self.state.lock();
        if let Some(obj) = state.objects.get_mut(&(value.as_ptr() as usize)) {
            obj.preserved = obj.preserved.saturating_sub(1);
        }
    }

    fn at_exit(&self, status: i32) {
        let mut state = self.state.lock();
        let live: Vec<usize> = state.objects.keys().copied().collect();
        for addr in live {
            state.free(addr);
        }
        state.frames.clear();
        state.closed = true;
        debug!("{}: shut down with status {}", self.name, status);
    }
}

impl Drop for LocalRuntime {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let live: Vec<usize> = state.objects.keys().copied().collect();
        for addr in live {
            state.free(addr);
        }
    }
}
