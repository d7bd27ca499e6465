/// Named logical files and their backends.
pub mod file_store;
/// On-disk shard documents.
pub mod models;
/// Remote-console wire client.
pub mod rcon;
/// Errors shared by file backends.
pub mod storage;
