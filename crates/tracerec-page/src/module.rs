//! Module attribution for page identities.

use std::hash::BuildHasher;

use rustc_hash::FxBuildHasher;

/// Module index stored on pages that no module owns.
pub const NO_MODULE: u32 = u32::MAX;

/// Stable identity of a page.
///
/// `module_hash(name) + (page_addr - module_base)` (wrapping) when a module owns
/// the page, otherwise the raw page address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey(pub u64);

impl PageKey {
    /// Key of a page inside a module.
    pub const fn in_module(module_hash: u64, rva: u64) -> Self {
        Self(module_hash.wrapping_add(rva))
    }

    /// Key of a page no module owns.
    pub const fn raw(page_addr: u64) -> Self {
        Self(page_addr)
    }
}

/// Address-to-module queries supplied by the host debugger.
pub trait ModuleResolver: Send + Sync {
    /// Name of the module containing `addr`.
    fn module_name(&self, addr: u64) -> Option<String>;

    /// Load base of the module containing `addr`.
    fn module_base(&self, addr: u64) -> Option<u64>;

    /// Hash of a module name. Must be stable across sessions.
    fn module_hash(&self, name: &str) -> u64 {
        FxBuildHasher.hash_one(name.to_lowercase())
    }

    /// Identity of the page at `page_addr`, with the owning module's name and
    /// the page's offset from the module base.
    fn page_identity(&self, page_addr: u64) -> (PageKey, Option<(String, u64)>) {
        match (self.module_name(page_addr), self.module_base(page_addr)) {
            (Some(name), Some(base)) if !name.is_empty() => {
                let rva = page_addr.wrapping_sub(base);
                (PageKey::in_module(self.module_hash(&name), rva), Some((name, rva)))
            }
            _ => (PageKey::raw(page_addr), None),
        }
    }
}

/// Resolver for processes without module information. Every page keys by its
/// raw address.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoModules;

impl ModuleResolver for NoModules {
    fn module_name(&self, _addr: u64) -> Option<String> {
        None
    }

    fn module_base(&self, _addr: u64) -> Option<u64> {
        None
    }
}

/// Append-only table of module names referenced by traced pages.
///
/// Index 0 is the empty name. Indices stay valid until `reset`.
#[derive(Clone, Debug)]
pub struct ModuleNames {
    names: Vec<String>,
}

impl ModuleNames {
    pub fn new() -> Self {
        Self {
            names: vec![String::new()],
        }
    }

    /// Index of `name`, appending it if unseen.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(i) = self.names.iter().position(|n| n == name) {
            return i as u32;
        }
        self.names.push(name.to_string());
        (self.names.len() - 1) as u32
    }

    /// Name at `index`. `NO_MODULE` and unknown indices give `None`.
    pub fn get(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    /// Drop every name except the empty sentinel.
    pub fn reset(&mut self) {
        self.names.truncate(1);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ModuleNames {
    fn default() -> Self {
        Self::new()
    }
}
