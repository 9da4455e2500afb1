pub mod deleter;
pub mod reader;
pub mod renamer;
pub mod writer;

/// Handle to the local filesystem. All file operations (read, write, rename,
/// delete) go through the trait impls below so callers can swap in a mock.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFile;
