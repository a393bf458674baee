mod sessions;

pub use sessions::SqliteSessionRepo;
