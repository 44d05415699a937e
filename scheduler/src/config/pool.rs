//! Configuration Object Pool
//!
//! Deduplicated, reference-counted arena for immutable configuration
//! fragments. Equal fragments share one entry; entries are addressed by
//! generation-checked index handles and freed when the last handle is
//! released.

use std::fmt;
use std::marker::PhantomData;

use super::ConfigPoolError;

/// Handle to an interned configuration fragment.
///
/// Handles are not `Clone`: a second handle to the same entry is obtained with
/// [`ConfigObjectPool::clone_handle`] so that the reference count stays exact.
/// Every handle goes back through [`ConfigObjectPool::release`].
#[must_use = "configuration handles must be released to their pool"]
pub struct ConfigHandle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ConfigHandle<T> {
    /// Index of the entry in the pool
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl<T> fmt::Debug for ConfigHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> PartialEq for ConfigHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for ConfigHandle<T> {}

#[derive(Debug)]
struct PoolEntry<T> {
    value: Option<T>,
    refcount: usize,
    generation: u32,
}

/// Arena of shared configuration fragments
#[derive(Debug)]
pub struct ConfigObjectPool<T> {
    entries: Vec<PoolEntry<T>>,
    free: Vec<u32>,
}

impl<T> Default for ConfigObjectPool<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T: PartialEq> ConfigObjectPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a handle to an entry equal to `value`, creating one if none exists
    pub fn intern(&mut self, value: T) -> ConfigHandle<T> {
        if let Some(index) = self
            .entries
            .iter()
            .position(|e| e.value.as_ref() == Some(&value))
        {
            let entry = &mut self.entries[index];
            entry.refcount += 1;
            return Self::handle(index as u32, entry.generation);
        }

        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.value = Some(value);
                entry.refcount = 1;
                Self::handle(index, entry.generation)
            }
            None => {
                self.entries.push(PoolEntry {
                    value: Some(value),
                    refcount: 1,
                    generation: 0,
                });
                Self::handle((self.entries.len() - 1) as u32, 0)
            }
        }
    }

    fn handle(index: u32, generation: u32) -> ConfigHandle<T> {
        ConfigHandle {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    fn entry(&self, handle: &ConfigHandle<T>) -> Result<&PoolEntry<T>, ConfigPoolError> {
        self.entries
            .get(handle.index as usize)
            .filter(|e| e.generation == handle.generation && e.value.is_some())
            .ok_or(ConfigPoolError::StaleHandle(handle.index))
    }

    fn entry_mut(
        &mut self,
        handle: &ConfigHandle<T>,
    ) -> Result<&mut PoolEntry<T>, ConfigPoolError> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|e| e.generation == handle.generation && e.value.is_some())
            .ok_or(ConfigPoolError::StaleHandle(handle.index))
    }

    /// Borrow the fragment behind `handle`
    pub fn get(&self, handle: &ConfigHandle<T>) -> Result<&T, ConfigPoolError> {
        self.entry(handle)?
            .value
            .as_ref()
            .ok_or(ConfigPoolError::StaleHandle(handle.index))
    }

    /// Take another reference to the entry behind `handle`
    pub fn clone_handle(
        &mut self,
        handle: &ConfigHandle<T>,
    ) -> Result<ConfigHandle<T>, ConfigPoolError> {
        let entry = self.entry_mut(handle)?;
        entry.refcount += 1;
        Ok(Self::handle(handle.index, handle.generation))
    }

    /// Drop a reference; the entry is freed with its last reference
    pub fn release(&mut self, handle: ConfigHandle<T>) -> Result<(), ConfigPoolError> {
        let entry = self.entry_mut(&handle)?;
        entry.refcount -= 1;
        if entry.refcount == 0 {
            entry.value = None;
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(handle.index);
        }
        Ok(())
    }

    /// Number of references to the entry behind `handle`
    pub fn refcount(&self, handle: &ConfigHandle<T>) -> usize {
        self.entry(handle).map(|e| e.refcount).unwrap_or(0)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
