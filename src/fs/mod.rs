//! Filesystem adapter: maps FUSE operations onto node-graph operations.

pub mod adapter;
pub mod inode;

pub use adapter::{ProjectionFs, WriterHandles, QUERY_DIR};
pub use inode::{InodeKey, InodeTable, ROOT_INO};
