use thiserror::Error;

/// Trace engine errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("page error: {0}")]
    Page(#[from] tracerec_page::PageError),
    #[error("page table persistence error: {0}")]
    Persist(#[from] tracerec_page::PersistError),
    #[error("run trace error: {0}")]
    Journal(#[from] tracerec_journal::JournalError),
}

pub type Result<T> = std::result::Result<T, Error>;
