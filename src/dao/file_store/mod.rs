/// Volatile backend.
pub mod memory;
/// Directory of YAML files.
pub mod yaml_dir;

use futures::future::BoxFuture;

use crate::dao::storage::StorageResult;

pub use self::{memory::MemoryFileStore, yaml_dir::YamlDirStore};

/// Abstraction over the durable home of the named logical files.
///
/// Keys are logical file names (`3-servers.yml`); payloads are already
/// serialized text. Implementations never interpret the contents.
pub trait FileStore: Send + Sync {
    /// Read a logical file, returning `None` when it does not exist.
    fn read(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;
    /// Durably replace the contents of a logical file.
    fn write(&self, key: &str, contents: String) -> BoxFuture<'static, StorageResult<()>>;
}
