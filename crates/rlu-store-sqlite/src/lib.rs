mod storage;

pub use storage::SqliteRecordStore;
