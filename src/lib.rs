/*!
 * Orbit VFS - one file API over local disk and object stores
 *
 * Files in S3, GCS or an in-memory store can be read, written, seeked and
 * closed as if they were local files. Remote objects are whole-object
 * stores, so random-access edits are staged in a local spill file and
 * committed on close, while plain sequential writes stream straight to the
 * backend.
 *
 * Version: 0.6.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod object;
pub mod os;
pub mod path;
pub mod registry;
pub mod retry;
pub mod vfs;

// Re-export commonly used types
pub use backend::{MemoryClient, ObjectClient};
pub use config::{LoggingConfig, Options, RetryConfig};
pub use error::{VfsError, VfsResult};
pub use object::{ObjectFile, ObjectFileSystem, ObjectLocation};
pub use os::{OsFile, OsFileSystem, OsLocation};
pub use registry::{parse_uri, FileSystemRegistry, ParsedUri};
pub use retry::{ExponentialBackoff, FixedAttempts, NoRetry, RetryPolicy};
pub use vfs::{DeleteOptions, File, FileSystem, Location};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
