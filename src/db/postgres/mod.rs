mod sessions;

pub use sessions::PostgresSessionRepo;
