//! Process-wide memo of foreign type descriptors.
//!
//! The foreign type table is global state shared by every thread, so the first request for a
//! given `(element, rank)` pair is single-flight: the map's lock is held while the descriptor is
//! created, and later callers get the memoised [`TypeRef`].

use std::collections::HashMap;

use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::{datatype::ElementType, errors::Result, runtime::Runtime, runtime::TypeRef};

static REGISTRY: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::new);

#[derive(Debug, Default)]
pub struct TypeRegistry {
    elements: Mutex<HashMap<ElementType, TypeRef>>,
    arrays: Mutex<HashMap<(ElementType, usize), TypeRef>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    /// The registry used for the installed runtime.
    pub fn global() -> &'static TypeRegistry {
        &REGISTRY
    }

    /// Descriptor of `ty`, registering it with `runtime` on first use.
    pub fn element_type(&self, runtime: &dyn Runtime, ty: ElementType) -> Result<TypeRef> {
        let mut elements = self.elements.lock();
        if let Some(found) = elements.get(&ty) {
            return Ok(*found);
        }
        let created = runtime.element_type(ty)?;
        debug!("registered element type {}", ty);
        elements.insert(ty, created);
        Ok(created)
    }

    /// Descriptor of `Array{ty, rank}`.
    pub fn array_type(&self, runtime: &dyn Runtime, ty: ElementType, rank: usize) -> Result<TypeRef> {
        // lock order: arrays, then elements
        let mut arrays = self.arrays.lock();
        if let Some(found) = arrays.get(&(ty, rank)) {
            return Ok(*found);
        }
        let element = self.element_type(runtime, ty)?;
        let created = runtime.apply_array_type(element, rank)?;
        debug!("registered array type Array{{{}, {}}}", ty, rank);
        arrays.insert((ty, rank), created);
        Ok(created)
    }

    pub fn len(&self) -> usize {
        self.arrays.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
