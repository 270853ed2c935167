//! `fuser::Filesystem` implementation.
//!
//! A thin mapping from kernel operations onto node-graph operations.
//! Attribute and entry TTLs are zero: content changes underneath the
//! kernel on every hot swap, so nothing may be cached.
//!
//! Writes accumulate into a per-handle buffer; `release` hands the full
//! buffer to the write-back pipeline. A validation-rejected edit still
//! reports success (it is parked as a draft, visible under
//! `_diagnostics/`).

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use tracing::debug;

use crate::error::ProjectionError;
use crate::fs::inode::{InodeKey, InodeTable, ROOT_INO};
use crate::graph::{child_id, GraphNode, NodeStore, WritableGraph};
use crate::writeback::WriteBack;

/// Name of the synthetic query directory at the mount root.
pub const QUERY_DIR: &str = ".query";

/// Zero TTL: nothing is cacheable under hot swap.
const TTL: Duration = Duration::from_secs(0);
const BLOCK_SIZE: u32 = 512;

/// Write-path collaborators, present only in writable mode.
pub struct WriterHandles {
    pub graph: Arc<WritableGraph>,
    pub writeback: WriteBack,
}

/// Cached uid/gid so attr builders avoid repeated syscalls.
struct UidGid {
    uid: u32,
    gid: u32,
}

impl UidGid {
    fn current() -> Self {
        UidGid {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }
}

struct WriteState {
    node_id: String,
    buffer: Vec<u8>,
    dirty: bool,
}

/// The filesystem adapter over a node store.
pub struct ProjectionFs {
    graph: Arc<dyn NodeStore>,
    writer: Option<Arc<WriterHandles>>,
    inodes: Mutex<InodeTable>,
    open_writes: Mutex<HashMap<u64, WriteState>>,
    /// Token → result rows, computed on first access per token.
    query_rows: Mutex<HashMap<String, Vec<String>>>,
    next_fh: AtomicU64,
    ids: UidGid,
}

impl ProjectionFs {
    pub fn new(graph: Arc<dyn NodeStore>, writer: Option<Arc<WriterHandles>>) -> Self {
        Self {
            graph,
            writer,
            inodes: Mutex::new(InodeTable::new()),
            open_writes: Mutex::new(HashMap::new()),
            query_rows: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
            ids: UidGid::current(),
        }
    }

    fn key_of(&self, ino: u64) -> Option<InodeKey> {
        self.inodes.lock().expect("inode lock").get(ino).cloned()
    }

    fn assign(&self, key: InodeKey) -> u64 {
        self.inodes.lock().expect("inode lock").get_or_assign(key)
    }

    fn dir_attr(&self, ino: u64, mtime: u64) -> FileAttr {
        self.attr(ino, FileType::Directory, 0, mtime, 0o755, 2)
    }

    fn file_attr(&self, ino: u64, size: u64, mtime: u64) -> FileAttr {
        let perm = if self.writer.is_some() { 0o644 } else { 0o444 };
        self.attr(ino, FileType::RegularFile, size, mtime, perm, 1)
    }

    fn attr(
        &self,
        ino: u64,
        kind: FileType,
        size: u64,
        mtime: u64,
        perm: u16,
        nlink: u32,
    ) -> FileAttr {
        let mtime = UNIX_EPOCH + Duration::from_secs(mtime);
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm,
            nlink,
            uid: self.ids.uid,
            gid: self.ids.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn node_attr(&self, ino: u64, node: &GraphNode) -> FileAttr {
        if node.is_dir() {
            self.dir_attr(ino, node.mtime)
        } else {
            self.file_attr(ino, node.size, node.mtime)
        }
    }

    /// Execute (or fetch) the ref query for a token.
    fn rows_for(&self, token: &str) -> Vec<String> {
        let mut cache = self.query_rows.lock().expect("query lock");
        if let Some(rows) = cache.get(token) {
            return rows.clone();
        }
        let rows = self.graph.query_refs(token).unwrap_or_default();
        cache.insert(token.to_string(), rows.clone());
        rows
    }

    fn row_content(&self, token: &str, name: &str) -> Option<Vec<u8>> {
        self.rows_for(token)
            .into_iter()
            .find(|row| row_name(row) == name)
            .map(String::into_bytes)
    }
}

/// Row files are named by their node id with path separators flattened.
fn row_name(node_id: &str) -> String {
    node_id.replace('/', "_")
}

fn errno(e: &ProjectionError) -> i32 {
    e.errno()
}

impl Filesystem for ProjectionFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(parent_key) = self.key_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        match parent_key {
            InodeKey::Node(dir_id) => {
                if parent == ROOT_INO && name == QUERY_DIR {
                    let ino = self.assign(InodeKey::QueryRoot);
                    reply.entry(&TTL, &self.dir_attr(ino, 0), 0);
                    return;
                }
                let id = child_id(&dir_id, name);
                match self.graph.get_node(&id) {
                    Ok(node) => {
                        let ino = self.assign(InodeKey::Node(id));
                        reply.entry(&TTL, &self.node_attr(ino, &node), 0);
                    }
                    Err(e) => reply.error(errno(&e)),
                }
            }
            InodeKey::QueryRoot => {
                let ino = self.assign(InodeKey::Query(name.to_string()));
                reply.entry(&TTL, &self.dir_attr(ino, 0), 0);
            }
            InodeKey::Query(token) => match self.row_content(&token, name) {
                Some(content) => {
                    let ino = self.assign(InodeKey::QueryRow {
                        token,
                        name: name.to_string(),
                    });
                    reply.entry(&TTL, &self.file_attr(ino, content.len() as u64, 0), 0);
                }
                None => reply.error(libc::ENOENT),
            },
            InodeKey::QueryRow { .. } => reply.error(libc::ENOTDIR),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.key_of(ino) {
            Some(InodeKey::Node(id)) => match self.graph.get_node(&id) {
                Ok(node) => reply.attr(&TTL, &self.node_attr(ino, &node)),
                Err(e) => reply.error(errno(&e)),
            },
            Some(InodeKey::QueryRoot) | Some(InodeKey::Query(_)) => {
                reply.attr(&TTL, &self.dir_attr(ino, 0))
            }
            Some(InodeKey::QueryRow { token, name }) => match self.row_content(&token, &name) {
                Some(content) => {
                    reply.attr(&TTL, &self.file_attr(ino, content.len() as u64, 0))
                }
                None => reply.error(libc::ENOENT),
            },
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(key) = self.key_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        // (ino, type, name) triples, `.` and `..` prepended.
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ROOT_INO, FileType::Directory, "..".to_string()),
        ];
        match key {
            InodeKey::Node(dir_id) => {
                let children = match self.graph.list_children(&dir_id) {
                    Ok(children) => children,
                    Err(e) => {
                        reply.error(errno(&e));
                        return;
                    }
                };
                for child in children {
                    let kind = if child.is_dir() {
                        FileType::Directory
                    } else {
                        FileType::RegularFile
                    };
                    let child_ino = self.assign(InodeKey::Node(child.id.clone()));
                    entries.push((child_ino, kind, child.name));
                }
            }
            InodeKey::QueryRoot => {
                // Tokens appear once queried; list the ones we've seen.
                let cache = self.query_rows.lock().expect("query lock");
                for token in cache.keys() {
                    let ino = self
                        .inodes
                        .lock()
                        .expect("inode lock")
                        .get_or_assign(InodeKey::Query(token.clone()));
                    entries.push((ino, FileType::Directory, token.clone()));
                }
            }
            InodeKey::Query(token) => {
                for row in self.rows_for(&token) {
                    let name = row_name(&row);
                    let ino = self.assign(InodeKey::QueryRow {
                        token: token.clone(),
                        name: name.clone(),
                    });
                    entries.push((ino, FileType::RegularFile, name));
                }
            }
            InodeKey::QueryRow { .. } => {
                reply.error(libc::ENOTDIR);
                return;
            }
        }

        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(key) = self.key_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let accmode = flags & libc::O_ACCMODE;
        let wants_write = accmode != libc::O_RDONLY;

        match key {
            InodeKey::Node(id) => {
                let node = match self.graph.get_node(&id) {
                    Ok(node) => node,
                    Err(e) => {
                        reply.error(errno(&e));
                        return;
                    }
                };
                if node.is_dir() {
                    reply.error(libc::EISDIR);
                    return;
                }
                if wants_write {
                    if self.writer.is_none() {
                        reply.error(libc::EROFS);
                        return;
                    }
                    let buffer = if flags & libc::O_TRUNC != 0 {
                        Vec::new()
                    } else {
                        node.content.clone().unwrap_or_default()
                    };
                    let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
                    self.open_writes.lock().expect("write lock").insert(
                        fh,
                        WriteState {
                            node_id: id,
                            buffer,
                            dirty: false,
                        },
                    );
                    reply.opened(fh, 0);
                    return;
                }
                let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
                reply.opened(fh, 0);
            }
            InodeKey::QueryRow { .. } => {
                if wants_write {
                    reply.error(libc::EROFS);
                    return;
                }
                let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
                reply.opened(fh, 0);
            }
            _ => reply.error(libc::EISDIR),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.key_of(ino) {
            Some(InodeKey::Node(id)) => {
                let mut buf = vec![0u8; size as usize];
                match self.graph.read_content(&id, &mut buf, offset as u64) {
                    Ok(n) => reply.data(&buf[..n]),
                    Err(e) => reply.error(errno(&e)),
                }
            }
            Some(InodeKey::QueryRow { token, name }) => {
                match self.row_content(&token, &name) {
                    Some(content) => {
                        let start = (offset as usize).min(content.len());
                        let end = (start + size as usize).min(content.len());
                        reply.data(&content[start..end]);
                    }
                    None => reply.error(libc::ENOENT),
                }
            }
            Some(_) => reply.error(libc::EISDIR),
            None => reply.error(libc::ENOENT),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let mut writes = self.open_writes.lock().expect("write lock");
        let Some(state) = writes.get_mut(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        let offset = offset as usize;
        let end = offset + data.len();
        if state.buffer.len() < end {
            state.buffer.resize(end, 0);
        }
        state.buffer[offset..end].copy_from_slice(data);
        state.dirty = true;
        reply.written(data.len() as u32);
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // Truncate on an open write handle adjusts the pending buffer.
        if let (Some(new_size), Some(fh)) = (size, fh) {
            let mut writes = self.open_writes.lock().expect("write lock");
            if let Some(state) = writes.get_mut(&fh) {
                state.buffer.resize(new_size as usize, 0);
                state.dirty = true;
            }
        }
        match self.key_of(ino) {
            Some(InodeKey::Node(id)) => match self.graph.get_node(&id) {
                Ok(node) => reply.attr(&TTL, &self.node_attr(ino, &node)),
                Err(e) => reply.error(errno(&e)),
            },
            Some(_) => reply.attr(&TTL, &self.dir_attr(ino, 0)),
            None => reply.error(libc::ENOENT),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let state = self.open_writes.lock().expect("write lock").remove(&fh);
        let Some(state) = state else {
            reply.ok();
            return;
        };
        if !state.dirty {
            reply.ok();
            return;
        }
        let Some(writer) = &self.writer else {
            reply.error(libc::EROFS);
            return;
        };
        match writer
            .writeback
            .apply(&writer.graph, &state.node_id, &state.buffer)
        {
            // Drafts also report success: the mount never rejects the
            // write, the edit is just parked.
            Ok(outcome) => {
                debug!(node_id = %state.node_id, ?outcome, "release write-back");
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_name_flattens_separators() {
        assert_eq!(row_name("functions/ProcessOrder/source"), "functions_ProcessOrder_source");
        assert_eq!(row_name("plain"), "plain");
    }
}
