//! Append-only backend table with a one-way finalize step.

use std::any::Any;
use std::cmp::Ordering;

use tracing::{debug, info, warn};

use crate::caps::descriptor::{BackendDescriptor, BACKEND_DESC_ABI_VERSION};
use crate::caps::select::SelectionEntry;
use crate::caps::CapsError;

/// Maximum number of backends across all subsystems.
pub const MAX_BACKENDS: usize = 64;

/// Caller-owned backend table.
///
/// Registration is only possible before [`finalize`](Self::finalize); after
/// that the table is sorted and never changes, which is what makes selection
/// independent of the order backends were registered in.
#[derive(Debug)]
pub struct CapsRegistry {
    backends: Vec<BackendDescriptor>,
    finalized: bool,
}

impl Default for CapsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapsRegistry {
    pub fn new() -> Self {
        Self {
            backends: Vec::with_capacity(MAX_BACKENDS),
            finalized: false,
        }
    }

    /// Append a backend descriptor.
    pub fn register(&mut self, desc: BackendDescriptor) -> Result<(), CapsError> {
        if self.finalized {
            warn!(backend = %desc.backend_name, "registration attempted after finalize");
            return Err(CapsError::Finalized);
        }
        if desc.abi_version != BACKEND_DESC_ABI_VERSION {
            return Err(CapsError::BadDesc {
                reason: "descriptor ABI version mismatch",
            });
        }
        if desc.subsystem_id == 0 {
            return Err(CapsError::BadDesc {
                reason: "subsystem id is zero",
            });
        }
        if desc.backend_name.is_empty() {
            return Err(CapsError::BadDesc {
                reason: "backend name is empty",
            });
        }
        if self
            .backends
            .iter()
            .any(|b| b.subsystem_id == desc.subsystem_id && b.name_eq(&desc.backend_name))
        {
            return Err(CapsError::Duplicate {
                subsystem_id: desc.subsystem_id,
                name: desc.backend_name,
            });
        }
        if self.backends.len() >= MAX_BACKENDS {
            return Err(CapsError::TooMany {
                capacity: MAX_BACKENDS,
            });
        }

        debug!(
            subsystem_id = desc.subsystem_id,
            backend = %desc.backend_name,
            priority = desc.priority,
            grade = %desc.determinism_grade,
            "backend registered"
        );
        self.backends.push(desc);
        Ok(())
    }

    /// Sort the table and freeze it. A second call fails with
    /// [`CapsError::Finalized`].
    pub fn finalize(&mut self) -> Result<(), CapsError> {
        if self.finalized {
            return Err(CapsError::Finalized);
        }
        self.backends.sort_by(canonical_order);
        self.finalized = true;
        info!(backends = self.backends.len(), "backend registry finalized");
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Descriptor at `index` in table order (sorted once finalized).
    pub fn backend_get(&self, index: usize) -> Option<&BackendDescriptor> {
        self.backends.get(index)
    }

    pub fn backends(&self) -> &[BackendDescriptor] {
        &self.backends
    }

    /// Look up a backend by subsystem and case-insensitive name.
    pub fn find(&self, subsystem_id: u32, name: &str) -> Option<&BackendDescriptor> {
        self.backends
            .iter()
            .find(|b| b.subsystem_id == subsystem_id && b.name_eq(name))
    }

    /// Resolve a subsystem name (as carried by its descriptors) to its id.
    pub fn subsystem_id_by_name(&self, name: &str) -> Option<u32> {
        self.backends
            .iter()
            .find(|b| {
                b.subsystem_name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .map(|b| b.subsystem_id)
    }

    /// Query the API object of a selected backend for the given ABI version.
    pub fn backend_api(
        &self,
        entry: &SelectionEntry,
        abi_version: u32,
    ) -> Option<&'static (dyn Any + Sync)> {
        let desc = self.backend_get(entry.backend_index)?;
        if desc.subsystem_id != entry.subsystem_id || !desc.name_eq(&entry.backend_name) {
            return None;
        }
        desc.get_api.and_then(|get_api| get_api(abi_version))
    }

    /// Contiguous runs of descriptors sharing a subsystem id, in table order.
    pub(crate) fn subsystem_groups(&self) -> SubsystemGroups<'_> {
        SubsystemGroups {
            rest: &self.backends,
            offset: 0,
        }
    }
}

/// `(subsystem_id asc, priority desc, name asc case-insensitive)`.
fn canonical_order(a: &BackendDescriptor, b: &BackendDescriptor) -> Ordering {
    a.subsystem_id
        .cmp(&b.subsystem_id)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| cmp_ignore_ascii_case(&a.backend_name, &b.backend_name))
}

fn cmp_ignore_ascii_case(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

/// Iterator over `(table offset, group)` pairs.
pub(crate) struct SubsystemGroups<'a> {
    rest: &'a [BackendDescriptor],
    offset: usize,
}

impl<'a> Iterator for SubsystemGroups<'a> {
    type Item = (usize, &'a [BackendDescriptor]);

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.first()?;
        let len = self
            .rest
            .iter()
            .take_while(|b| b.subsystem_id == first.subsystem_id)
            .count();
        let (group, rest) = self.rest.split_at(len);
        let offset = self.offset;
        self.rest = rest;
        self.offset += len;
        Some((offset, group))
    }
}
