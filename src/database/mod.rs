pub mod error;
pub mod repo;
pub mod row;
pub mod schema;
