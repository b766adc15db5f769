//! Page-level execution statistics.
//!
//! Every instrumented 4 KB page carries one of three fixed-size layouts:
//!
//! | Layout        | Bytes/page | Per byte                          |
//! |---------------|------------|-----------------------------------|
//! | `BitExec`     | 512        | executed bit                      |
//! | `ByteCounter` | 4096       | 2-bit class + 6-bit hit count     |
//! | `WordCounter` | 8192       | 2-bit class + 14-bit hit count    |
//!
//! Pages are keyed by a module-relative identity so statistics survive the
//! module being reloaded at a different base.
//!
//! ```ignore
//! use tracerec_page::{PageLayout, PageTable};
//!
//! let table = PageTable::new(resolver);
//! table.arm(0x401000, Some(PageLayout::ByteCounter))?;
//! table.record_execution(0x401000, 3);
//! assert_eq!(table.hit_count(0x401000), 1);
//! ```

mod classify;
mod layout;
mod module;
mod persist;
mod table;

pub use classify::{ByteClass, classify};
pub use layout::{ByteCell, PageData, PageLayout, WordCell};
pub use module::{ModuleNames, ModuleResolver, NO_MODULE, NoModules, PageKey};
pub use persist::{HexCodec, PersistError, TRACE_RECORD_KEY, TextCodec};
pub use table::{PageError, PageInfo, PageTable};

/// Size of an instrumented page.
pub const PAGE_SIZE: usize = 4096;

/// Round an address down to its page.
#[inline]
pub const fn page_base(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}
