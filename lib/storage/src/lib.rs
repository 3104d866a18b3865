pub mod archive;
pub mod memory;

pub use archive::{ArchiveEntry, BackupArchive};
pub use memory::{EntityMapping, MemoryStore, Row};
