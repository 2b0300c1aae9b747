pub mod backup;
pub mod importer;
pub mod mimetype;
pub mod scanner;
pub mod thumbnail;
