//! File-level operations
//!
//! Everything here is a composition of content storage and reference
//! appends. Nothing is modified in place: a write, rename or chmod adds
//! references, and older views keep seeing the previous ones.

use alloc::borrow::Cow;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::ops::ControlFlow;

use crate::mm::PageAllocator;
use crate::platform::{BlockDevice, Sector, SECTOR_SIZE};

use super::access::Permissions;
use super::error::{GeoError, GeoResult};
use super::hash::ContentHash;
use super::path;
use super::types::{DirEntry, FileStat, FileType, FindFilter, FindMatch, GrepMatch};
use super::volume::{NewRef, Volume, DIR_MARKER};

/// Largest file `file_grep` will search.
pub const GREP_MAX_FILE: usize = 64 * 1024;

impl<A: PageAllocator> Volume<A> {
    // ------------------------------------------------------------------
    // Reading and writing
    // ------------------------------------------------------------------

    /// Write `data` as the new content of `path`.
    ///
    /// Replaces a symbolic link at `path` rather than writing through it.
    ///
    /// # Errors
    /// * `InvalidArgument` - Malformed path
    /// * `IsADirectory` - `path` is a directory
    /// * `NotADirectory` - The parent is a regular file
    /// * `PermissionDenied` - No write permission on the existing file
    /// * `QuotaExceeded`, `OutOfMemory`
    pub fn file_write(&mut self, path: &str, data: &[u8]) -> GeoResult<()> {
        path::validate(path)?;
        let hash = ContentHash::of(data);
        let new = self.plan_file_ref(path, hash)?;
        self.commit_refs(Some((&hash, data)), &[new])
    }

    /// Read a file into `buf`, following symbolic links.
    ///
    /// Returns the file size, which may exceed `buf.len()`.
    pub fn file_read(&self, path: &str, buf: &mut [u8]) -> GeoResult<usize> {
        let content = self.readable(path)?;
        self.content_read(&content, buf)
    }

    /// The whole content of a file, following symbolic links.
    ///
    /// Borrowed from the region unless the block was stored compressed.
    pub fn file_contents(&self, path: &str) -> GeoResult<Cow<'_, [u8]>> {
        let content = self.readable(path)?;
        self.content(&content)
    }

    /// Content of a readable regular file.
    fn readable(&self, path: &str) -> GeoResult<ContentHash> {
        path::validate(path)?;
        let entry = self.resolve(path)?;
        if entry.file_type == FileType::Directory {
            return Err(GeoError::IsADirectory);
        }
        self.ctx.check(entry.owner, entry.permissions, Permissions::READ)?;
        Ok(entry.content)
    }

    /// Metadata of `path` (symbolic links are not followed).
    pub fn file_stat(&self, path: &str) -> GeoResult<FileStat> {
        path::validate(path)?;
        let entry = self.lookup(path).ok_or(GeoError::NotFound)?;

        let size = match entry.file_type {
            FileType::Directory => 0,
            _ => self.content_size(&entry.content)?,
        };
        let links = match entry.file_type {
            FileType::File => self
                .refs
                .paths_in(&self.ancestry)
                .filter_map(|p| self.lookup_in(p, &self.ancestry))
                .filter(|e| e.file_type == FileType::File && e.content == entry.content)
                .count() as u32,
            _ => 1,
        };

        Ok(FileStat {
            size,
            file_type: entry.file_type,
            permissions: entry.permissions,
            owner: entry.owner,
            created: entry.created,
            view: entry.view,
            content: entry.content,
            links,
        })
    }

    /// Does `path` name anything in the current view?
    pub fn exists(&self, path: &str) -> bool {
        path::validate(path).is_ok() && self.lookup(path).is_some()
    }

    /// Create a directory.
    ///
    /// # Errors
    /// * `AlreadyExists` - Something is visible at `path`
    /// * `NotADirectory` - The parent is a regular file
    pub fn mkdir(&mut self, path: &str) -> GeoResult<()> {
        path::validate(path)?;
        if self.lookup(path).is_some() {
            return Err(GeoError::AlreadyExists);
        }
        self.check_parent(path)?;

        let marker = ContentHash::of(DIR_MARKER);
        let new = self.new_ref(path, marker, FileType::Directory);
        // The marker block is stored on the first mkdir only.
        let data = self.content.get(&marker).is_none().then_some((&marker, DIR_MARKER));
        self.commit_refs(data, &[new])
    }

    /// Append `data` to a file, creating it if missing.
    ///
    /// The old content block stays in place for older views.
    pub fn file_append(&mut self, path: &str, data: &[u8]) -> GeoResult<()> {
        path::validate(path)?;
        let (target, mut combined) = match self.resolve(path) {
            Err(GeoError::NotFound) => return self.file_write(path, data),
            Err(e) => return Err(e),
            Ok(e) if e.file_type == FileType::Directory => return Err(GeoError::IsADirectory),
            Ok(e) => {
                self.ctx.check(e.owner, e.permissions, Permissions::WRITE)?;
                (e.clone(), self.content(&e.content)?.into_owned())
            }
        };
        combined.extend_from_slice(data);

        let hash = ContentHash::of(&combined);
        let new = NewRef {
            content: hash,
            ..NewRef::like(&target, &target.path)
        };
        self.commit_refs(Some((&hash, &combined)), &[new])
    }

    /// Move `from` to `to`.
    ///
    /// Adds a reference at `to` and a hidden marker at `from`, in one
    /// view. A directory brings its visible descendants along.
    ///
    /// # Errors
    /// * `NotFound` - `from` is not visible
    /// * `AlreadyExists` - `to` is visible
    /// * `InvalidArgument` - `to` lies inside `from`
    pub fn file_rename(&mut self, from: &str, to: &str) -> GeoResult<()> {
        path::validate(from)?;
        path::validate(to)?;
        if from == to || path::below(from, to).is_some() {
            return Err(GeoError::InvalidArgument);
        }

        let src = self.lookup(from).ok_or(GeoError::NotFound)?;
        self.ctx.check(src.owner, src.permissions, Permissions::WRITE)?;
        if self.lookup(to).is_some() {
            return Err(GeoError::AlreadyExists);
        }
        self.check_parent(to)?;

        let mut refs = vec![NewRef::like(src, to), NewRef::hiding(src)];
        if src.file_type == FileType::Directory {
            for p in self.refs.paths_in(&self.ancestry) {
                let (Some(rest), Some(child)) = (path::below(from, p), self.lookup_in(p, &self.ancestry)) else {
                    continue;
                };
                refs.push(NewRef::like(child, &path::join(to, rest)));
                refs.push(NewRef::hiding(child));
            }
        }
        self.commit_refs(None, &refs)?;
        log::debug!("renamed {} -> {} ({} refs)", from, to, refs.len());
        Ok(())
    }

    /// Copy `from` to `to` without copying data: both share one block.
    pub fn file_copy(&mut self, from: &str, to: &str) -> GeoResult<()> {
        path::validate(to)?;
        let content = self.readable(from)?;
        if self.lookup(to).is_some() {
            return Err(GeoError::AlreadyExists);
        }
        self.check_parent(to)?;
        let new = self.new_ref(to, content, FileType::File);
        self.commit_refs(None, &[new])
    }

    /// Replace the permission mask of `path`.
    ///
    /// # Errors
    /// * `PermissionDenied` - Neither the owner nor privileged
    pub fn file_chmod(&mut self, path: &str, permissions: Permissions) -> GeoResult<()> {
        path::validate(path)?;
        let entry = self.lookup(path).ok_or(GeoError::NotFound)?;
        if entry.owner != self.ctx.uid {
            self.ctx.require_privileged()?;
        }
        let new = NewRef {
            permissions,
            ..NewRef::like(entry, path)
        };
        self.commit_refs(None, &[new])
    }

    /// Give `path` to another owner. Privileged only.
    pub fn file_chown(&mut self, path: &str, owner: u16) -> GeoResult<()> {
        path::validate(path)?;
        self.ctx.require_privileged()?;
        let entry = self.lookup(path).ok_or(GeoError::NotFound)?;
        let new = NewRef {
            owner,
            ..NewRef::like(entry, path)
        };
        self.commit_refs(None, &[new])
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Create a symbolic link at `link` pointing to `target`.
    ///
    /// The target need not exist.
    pub fn file_symlink(&mut self, target: &str, link: &str) -> GeoResult<()> {
        path::validate(target)?;
        path::validate(link)?;
        if self.lookup(link).is_some() {
            return Err(GeoError::AlreadyExists);
        }
        self.check_parent(link)?;

        let data = target.as_bytes();
        let hash = ContentHash::of(data);
        let new = self.new_ref(link, hash, FileType::Symlink);
        self.commit_refs(Some((&hash, data)), &[new])
    }

    /// Target of a symbolic link.
    ///
    /// # Errors
    /// * `NotFound` - Nothing visible at `link`
    /// * `InvalidArgument` - `link` is not a symbolic link
    pub fn file_readlink(&self, link: &str) -> GeoResult<String> {
        path::validate(link)?;
        let entry = self.lookup(link).ok_or(GeoError::NotFound)?;
        if entry.file_type != FileType::Symlink {
            return Err(GeoError::InvalidArgument);
        }
        let data = self.content(&entry.content)?;
        let target = core::str::from_utf8(&data).map_err(|_| GeoError::Corrupt)?;
        Ok(target.to_string())
    }

    /// Hard link: `new` shares the content and metadata of `existing`.
    pub fn file_link(&mut self, existing: &str, new: &str) -> GeoResult<()> {
        path::validate(existing)?;
        path::validate(new)?;
        let entry = self.lookup(existing).ok_or(GeoError::NotFound)?;
        if entry.file_type == FileType::Directory {
            return Err(GeoError::IsADirectory);
        }
        self.ctx.check(entry.owner, entry.permissions, Permissions::READ)?;
        if self.lookup(new).is_some() {
            return Err(GeoError::AlreadyExists);
        }
        self.check_parent(new)?;
        let r = NewRef::like(entry, new);
        self.commit_refs(None, &[r])
    }

    // ------------------------------------------------------------------
    // Directory listing
    // ------------------------------------------------------------------

    /// Visible immediate children of `dir`, sorted by name.
    ///
    /// Paths deeper below `dir` imply a directory child even without an
    /// explicit directory reference.
    pub fn children(&self, dir: &str) -> GeoResult<Vec<DirEntry>> {
        path::validate_dir(dir)?;
        if dir != path::ROOT {
            if let Some(e) = self.lookup(dir) {
                if e.file_type != FileType::Directory {
                    return Err(GeoError::NotADirectory);
                }
            }
        }

        let mut entries: BTreeMap<&str, DirEntry> = BTreeMap::new();
        for p in self.refs.paths_in(&self.ancestry) {
            let Some(rest) = path::below(dir, p) else {
                continue;
            };
            let Some(entry) = self.lookup_in(p, &self.ancestry) else {
                continue;
            };

            match rest.split_once('/') {
                Some((first, _)) => {
                    entries.entry(first).or_insert_with(|| DirEntry {
                        name: first.to_string(),
                        path: path::join(dir, first),
                        file_type: FileType::Directory,
                        size: 0,
                    });
                }
                None => {
                    let size = match entry.file_type {
                        FileType::Directory => 0,
                        _ => self.content.get(&entry.content).map_or(0, |c| c.size),
                    };
                    entries.insert(
                        rest,
                        DirEntry {
                            name: rest.to_string(),
                            path: p.to_string(),
                            file_type: entry.file_type,
                            size,
                        },
                    );
                }
            }
        }
        Ok(entries.into_values().collect())
    }

    /// Call `f` for each visible child of `dir` until it breaks.
    ///
    /// Returns the number of entries delivered.
    ///
    /// # Errors
    /// * `NotADirectory` - `dir` names a file
    pub fn ref_list<F>(&self, dir: &str, mut f: F) -> GeoResult<usize>
    where
        F: FnMut(&DirEntry) -> ControlFlow<()>,
    {
        let mut count = 0;
        for entry in self.children(dir)? {
            count += 1;
            if f(&entry).is_break() {
                break;
            }
        }
        Ok(count)
    }

    /// Depth-first listing below `dir`.
    ///
    /// Immediate children have depth 0. Entries deeper than `max_depth`
    /// are skipped; a `max_depth` of 0 means no limit.
    pub fn ref_list_recursive<F>(&self, dir: &str, max_depth: usize, mut f: F) -> GeoResult<usize>
    where
        F: FnMut(&DirEntry, usize) -> ControlFlow<()>,
    {
        let mut count = 0;
        let _ = self.walk(dir, 0, max_depth, &mut count, &mut f)?;
        Ok(count)
    }

    fn walk<F>(&self, dir: &str, depth: usize, max_depth: usize, count: &mut usize, f: &mut F) -> GeoResult<ControlFlow<()>>
    where
        F: FnMut(&DirEntry, usize) -> ControlFlow<()>,
    {
        for entry in self.children(dir)? {
            *count += 1;
            if f(&entry, depth).is_break() {
                return Ok(ControlFlow::Break(()));
            }
            let descend = max_depth == 0 || depth + 1 < max_depth;
            if entry.is_dir() && descend && self.walk(&entry.path, depth + 1, max_depth, count, f)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Visible paths anywhere below `dir`, sorted.
    fn descendants(&self, dir: &str) -> GeoResult<Vec<&str>> {
        path::validate_dir(dir)?;
        let mut out: Vec<&str> = self
            .refs
            .paths_in(&self.ancestry)
            .filter(|p| path::below(dir, p).is_some())
            .filter(|p| self.lookup_in(p, &self.ancestry).is_some())
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Call `f` with every visible path below `dir` whose final component
    /// contains `pattern`, ignoring ASCII case.
    pub fn file_find<F>(&self, dir: &str, pattern: &str, mut f: F) -> GeoResult<usize>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        let mut count = 0;
        for p in self.descendants(dir)? {
            if contains(path::name(p), pattern, true) {
                count += 1;
                if f(p).is_break() {
                    break;
                }
            }
        }
        Ok(count)
    }

    /// Like [`file_find`](Self::file_find), but also requiring each match
    /// to pass `filter`. An empty `pattern` matches every name.
    pub fn file_find_filtered<F>(&self, dir: &str, pattern: &str, filter: &FindFilter, mut f: F) -> GeoResult<usize>
    where
        F: FnMut(FindMatch<'_>) -> ControlFlow<()>,
    {
        let mut count = 0;
        for p in self.descendants(dir)? {
            if !contains(path::name(p), pattern, true) {
                continue;
            }
            let Some(entry) = self.lookup_in(p, &self.ancestry) else {
                continue;
            };
            let size = match entry.file_type {
                FileType::Directory => 0,
                _ => self.content.get(&entry.content).map_or(0, |c| c.size),
            };
            if !filter.matches(size, entry.file_type, entry.owner) {
                continue;
            }
            count += 1;
            let m = FindMatch {
                path: p,
                size,
                file_type: entry.file_type,
            };
            if f(m).is_break() {
                break;
            }
        }
        Ok(count)
    }

    /// Search the lines of visible regular files below `dir`.
    ///
    /// Files larger than [`GREP_MAX_FILE`], files that are not UTF-8 and
    /// files the context may not read are skipped. Returns the number of
    /// matching lines.
    pub fn file_grep<F>(&self, dir: &str, pattern: &str, ignore_case: bool, mut f: F) -> GeoResult<usize>
    where
        F: FnMut(GrepMatch<'_>) -> ControlFlow<()>,
    {
        if pattern.is_empty() {
            return Ok(0);
        }

        let mut count = 0;
        for p in self.descendants(dir)? {
            let Some(entry) = self.lookup_in(p, &self.ancestry) else {
                continue;
            };
            if entry.file_type != FileType::File
                || self.ctx.check(entry.owner, entry.permissions, Permissions::READ).is_err()
            {
                continue;
            }
            if self.content_size(&entry.content)? > GREP_MAX_FILE as u64 {
                continue;
            }
            let data = self.content(&entry.content)?;
            let Ok(text) = core::str::from_utf8(&data) else {
                continue;
            };

            for (i, line) in text.split('\n').enumerate() {
                if !contains(line, pattern, ignore_case) {
                    continue;
                }
                count += 1;
                let m = GrepMatch {
                    path: p,
                    line_number: i + 1,
                    line,
                };
                if f(m).is_break() {
                    return Ok(count);
                }
            }
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Raw sector transfer
    // ------------------------------------------------------------------

    /// Write the bytes of a file to consecutive sectors from `start`.
    ///
    /// The last sector is zero-padded. Returns the sectors written.
    pub fn file_export(&self, path: &str, dev: &mut dyn BlockDevice, drive: u8, start: u64) -> GeoResult<u64> {
        let data = self.file_contents(path)?;
        let mut sector: Sector = [0; SECTOR_SIZE];
        let mut written = 0;
        for chunk in data.chunks(SECTOR_SIZE) {
            sector.fill(0);
            sector[..chunk.len()].copy_from_slice(chunk);
            dev.write_sector(drive, start + written, &sector)?;
            written += 1;
        }
        dev.flush(drive)?;
        Ok(written)
    }

    /// Read `size` bytes from consecutive sectors and write them to `path`.
    pub fn file_import(
        &mut self,
        path: &str,
        dev: &mut dyn BlockDevice,
        drive: u8,
        start: u64,
        size: usize,
    ) -> GeoResult<()> {
        path::validate(path)?;
        let mut data = Vec::with_capacity(size);
        let mut sector: Sector = [0; SECTOR_SIZE];
        let mut lba = start;
        while data.len() < size {
            dev.read_sector(drive, lba, &mut sector)?;
            let take = (size - data.len()).min(SECTOR_SIZE);
            data.extend_from_slice(&sector[..take]);
            lba += 1;
        }
        self.file_write(path, &data)
    }
}

/// Substring test, optionally ignoring ASCII case.
fn contains(haystack: &str, needle: &str, ignore_case: bool) -> bool {
    if !ignore_case {
        return haystack.contains(needle);
    }
    let (h, n) = (haystack.as_bytes(), needle.as_bytes());
    n.is_empty() || h.windows(n.len()).any(|w| w.eq_ignore_ascii_case(n))
}
