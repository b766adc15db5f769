//! Pages command.

use std::path::Path;

use tracerec::{HexCodec, NoModules, PAGE_SIZE, PageInfo, PageTable};
use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, PageSortArg};
use crate::terminal::{self, label};

/// Handle the `pages` command.
pub fn cmd_pages(db: &Path, sort: PageSortArg) -> i32 {
    let text = match std::fs::read_to_string(db) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, path = %db.display(), "failed to read database");
            return EXIT_FAILURE;
        }
    };
    let root: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, path = %db.display(), "database is not valid JSON");
            return EXIT_FAILURE;
        }
    };
    let Some(root) = root.as_object() else {
        terminal::error("database root is not an object");
        return EXIT_FAILURE;
    };

    let table = PageTable::new(NoModules);
    if let Err(e) = table.load(root, &HexCodec) {
        error!(error = %e, "failed to load page table");
        return EXIT_FAILURE;
    }

    let mut pages = table.pages();
    if let PageSortArg::Coverage = sort {
        pages.sort_by(|a, b| b.executed_bytes.cmp(&a.executed_bytes));
    }

    if pages.is_empty() {
        terminal::warning("no traced pages");
        return EXIT_SUCCESS;
    }

    println!(
        "{:<32} {:<14} {:>9}",
        label("page"),
        label("layout"),
        label("executed")
    );
    for page in &pages {
        println!("{}", format_page(page));
    }

    let executed: usize = pages.iter().map(|p| p.executed_bytes).sum();
    terminal::success(&format!(
        "{} pages, {} executed bytes",
        pages.len(),
        executed
    ));
    EXIT_SUCCESS
}

fn format_page(page: &PageInfo) -> String {
    let location = if page.module.is_empty() {
        format!("{:#x}", page.rva)
    } else {
        format!("{}+{:#x}", page.module, page.rva)
    };
    let percent = page.executed_bytes * 100 / PAGE_SIZE;
    format!(
        "{:<32} {:<14} {:>5} ({:>3}%)",
        location,
        page.layout.name(),
        page.executed_bytes,
        percent
    )
}
