pub mod database;
pub mod ingest;
pub mod metadata;
pub mod search;
pub mod utils;
