//! The page table: armed pages and their statistics.

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::classify::ByteClass;
use crate::layout::{PageData, PageLayout};
use crate::module::{ModuleNames, ModuleResolver, NO_MODULE, PageKey};
use crate::{PAGE_SIZE, page_base};

/// Errors from arming a page.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("page {page:#x} is already armed as {existing}, cannot re-arm as {requested}")]
    LayoutConflict {
        page: u64,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("page {page:#x} collides with another page under key {key:#x}")]
    KeyCollision { page: u64, key: u64 },
}

pub(crate) struct TracedPage {
    pub(crate) data: Mutex<PageData>,
    pub(crate) module_index: u32,
    pub(crate) rva: u64,
}

pub(crate) struct Inner {
    pub(crate) pages: FxHashMap<PageKey, TracedPage>,
    pub(crate) modules: ModuleNames,
}

impl Inner {
    pub(crate) fn clear(&mut self) {
        self.pages.clear();
        self.modules.reset();
    }
}

/// Summary of one armed page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageInfo {
    pub key: PageKey,
    /// Owning module, empty when unattributed.
    pub module: String,
    /// Offset from the module base, or the raw page address.
    pub rva: u64,
    pub layout: PageLayout,
    pub executed_bytes: usize,
}

/// Execution statistics for armed pages.
///
/// The page map sits behind a reader-writer lock: arming, disarming, clearing
/// and loading take it exclusively, while queries and `record_execution` share
/// it. Each page buffer has its own mutex, so concurrent recorders on the same
/// page never lose an update.
pub struct PageTable {
    resolver: Box<dyn ModuleResolver>,
    pub(crate) inner: RwLock<Inner>,
}

impl PageTable {
    pub fn new(resolver: impl ModuleResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
            inner: RwLock::new(Inner {
                pages: FxHashMap::default(),
                modules: ModuleNames::new(),
            }),
        }
    }

    pub(crate) fn resolver(&self) -> &dyn ModuleResolver {
        self.resolver.as_ref()
    }

    /// Identity of the page containing `addr`.
    pub fn key_of(&self, addr: u64) -> PageKey {
        self.resolver.page_identity(page_base(addr)).0
    }

    /// Whether a page is armed under `key`.
    pub fn contains(&self, key: PageKey) -> bool {
        self.inner.read().pages.contains_key(&key)
    }

    /// Arm the page containing `page_addr` with `layout`, or disarm it with `None`.
    ///
    /// Arming an armed page with the same layout is a no-op. A different
    /// layout is rejected and the page is left untouched.
    pub fn arm(&self, page_addr: u64, layout: Option<PageLayout>) -> Result<(), PageError> {
        let page = page_base(page_addr);
        let (key, module) = self.resolver.page_identity(page);

        let Some(layout) = layout else {
            if self.inner.write().pages.remove(&key).is_some() {
                debug!(page = format!("{:#x}", page), "disarmed page");
            }
            return Ok(());
        };

        let mut inner = self.inner.write();
        let (module_index, rva) = match &module {
            Some((name, rva)) => (Some(name.as_str()), *rva),
            None => (None, page),
        };

        if let Some(existing) = inner.pages.get(&key) {
            let same_module = match module_index {
                Some(name) => inner.modules.get(existing.module_index) == Some(name),
                None => existing.module_index == NO_MODULE,
            };
            if !same_module || existing.rva != rva {
                warn!(
                    page = format!("{:#x}", page),
                    key = format!("{:#x}", key.0),
                    "page key collision"
                );
                return Err(PageError::KeyCollision { page, key: key.0 });
            }
            let existing = existing.data.lock().layout();
            if existing == layout {
                return Ok(());
            }
            return Err(PageError::LayoutConflict {
                page,
                existing: existing.name(),
                requested: layout.name(),
            });
        }

        let module_index = module_index.map_or(NO_MODULE, |name| inner.modules.intern(name));
        inner.pages.insert(
            key,
            TracedPage {
                data: Mutex::new(PageData::new(layout)),
                module_index,
                rva,
            },
        );
        debug!(
            page = format!("{:#x}", page),
            layout = layout.name(),
            module = module.as_ref().map_or("", |(name, _)| name.as_str()),
            "armed page"
        );
        Ok(())
    }

    /// Layout of the page containing `addr`, if armed.
    pub fn layout_of(&self, addr: u64) -> Option<PageLayout> {
        self.with_page(addr, |data, _| data.layout())
    }

    /// Saturating hit count of the byte at `addr`.
    ///
    /// Zero for unarmed pages and for `BitExec` pages, which only know whether
    /// a byte executed.
    pub fn hit_count(&self, addr: u64) -> u32 {
        self.with_page(addr, |data, offset| data.hit_count(offset))
            .unwrap_or(0)
    }

    /// Whether the byte at `addr` has executed on an armed page.
    pub fn is_executed(&self, addr: u64) -> bool {
        self.with_page(addr, |data, offset| data.is_executed(offset))
            .unwrap_or(false)
    }

    /// Stored class of the byte at `addr`. `Heading` for unarmed and `BitExec` pages.
    pub fn byte_type(&self, addr: u64) -> ByteClass {
        self.with_page(addr, |data, offset| data.byte_class(offset))
            .unwrap_or(ByteClass::Heading)
    }

    /// Record one execution of an instruction of `size` bytes at `addr`.
    ///
    /// Does nothing if the page containing `addr` is unarmed. An instruction
    /// that crosses into the next page is recorded as two independent calls.
    pub fn record_execution(&self, addr: u64, size: usize) {
        self.record_execution_at(self.key_of(addr), addr, size);
    }

    /// [`PageTable::record_execution`] with the key of `addr`'s page already
    /// resolved by [`PageTable::key_of`].
    pub fn record_execution_at(&self, key: PageKey, addr: u64, size: usize) {
        if size == 0 {
            return;
        }
        let base = page_base(addr);
        let offset = (addr - base) as usize;

        let inner = self.inner.read();
        let Some(page) = inner.pages.get(&key) else {
            return;
        };

        if offset + size > PAGE_SIZE {
            drop(inner);
            let head = PAGE_SIZE - offset;
            trace!(
                addr = format!("{:#x}", addr),
                size, "instruction crosses page boundary"
            );
            self.record_execution_at(key, addr, head);
            self.record_execution(base + PAGE_SIZE as u64, size - head);
            return;
        }

        page.data.lock().record(offset, size);
    }

    /// Disarm every page and forget every module name.
    pub fn clear(&self) {
        self.inner.write().clear();
        debug!("cleared page table");
    }

    pub fn len(&self) -> usize {
        self.inner.read().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().pages.is_empty()
    }

    /// Snapshot of every armed page, ordered by key.
    pub fn pages(&self) -> Vec<PageInfo> {
        let inner = self.inner.read();
        let mut pages: Vec<PageInfo> = inner
            .pages
            .iter()
            .map(|(key, page)| {
                let data = page.data.lock();
                PageInfo {
                    key: *key,
                    module: inner
                        .modules
                        .get(page.module_index)
                        .unwrap_or_default()
                        .to_string(),
                    rva: page.rva,
                    layout: data.layout(),
                    executed_bytes: data.executed_bytes(),
                }
            })
            .collect();
        pages.sort_by_key(|p| p.key);
        pages
    }

    fn with_page<R>(&self, addr: u64, f: impl FnOnce(&PageData, usize) -> R) -> Option<R> {
        let offset = (addr - page_base(addr)) as usize;
        let key = self.key_of(addr);
        let inner = self.inner.read();
        let page = inner.pages.get(&key)?;
        let data = page.data.lock();
        Some(f(&data, offset))
    }
}

impl std::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTable")
            .field("pages", &self.len())
            .finish_non_exhaustive()
    }
}
