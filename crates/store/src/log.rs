// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Append-only value log backing a file-based store.
//!
//! Records are framed as `op(u8)` followed by op-specific payload. Puts
//! and deletes accumulate into a batch; a commit marker closes the batch
//! and carries the new state number. Replay on open applies only closed
//! batches, so a crash mid-commit leaves the store at the previous state.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::Path;

const OP_PUT: u8 = 0x01;
const OP_DEL: u8 = 0x02;
const OP_COMMIT: u8 = 0x03;

/// Position of a committed value inside the log file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueLocation {
    pub offset: u64,
    pub len: u32,
}

/// A committed entry: either held in memory or located in the log.
#[derive(Clone, Debug)]
pub enum ValueSlot {
    Inline(Vec<u8>),
    Stored(ValueLocation),
}

pub struct ValueLog {
    file: File,
    len: u64,
}

impl ValueLog {
    /// Opens (creating if absent) a log file and replays its committed
    /// batches. Returns the log positioned after the last commit marker,
    /// the replayed offsets map and the last committed state number.
    /// Anything after the last commit marker is discarded.
    pub fn open(path: &Path) -> Result<(Self, BTreeMap<Vec<u8>, ValueSlot>, u64)> {
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut offsets = BTreeMap::new();
        let mut staged: Vec<(Vec<u8>, Option<ValueLocation>)> = Vec::new();
        let mut tag = 0u64;
        let mut pos = 0usize;
        let mut committed_end = 0usize;

        while pos < buf.len() {
            let op = buf[pos];
            pos += 1;
            match op {
                OP_PUT => {
                    let Some((key, after_key)) = take_chunk(&buf, pos) else { break };
                    let Some((value_range, after_value)) = take_chunk_range(&buf, after_key)
                    else {
                        break;
                    };
                    staged.push((
                        key.to_vec(),
                        Some(ValueLocation {
                            offset: value_range.0 as u64,
                            len: (value_range.1 - value_range.0) as u32,
                        }),
                    ));
                    pos = after_value;
                }
                OP_DEL => {
                    let Some((key, after_key)) = take_chunk(&buf, pos) else { break };
                    staged.push((key.to_vec(), None));
                    pos = after_key;
                }
                OP_COMMIT => {
                    if pos + 8 > buf.len() {
                        break;
                    }
                    tag = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
                    pos += 8;
                    for (key, slot) in staged.drain(..) {
                        match slot {
                            Some(loc) => {
                                offsets.insert(key, ValueSlot::Stored(loc));
                            }
                            None => {
                                offsets.remove(&key);
                            }
                        }
                    }
                    committed_end = pos;
                }
                other => {
                    return Err(Error::Corrupted(format!(
                        "unknown log record op {other:#04x} at offset {}",
                        pos - 1
                    )));
                }
            }
        }

        // Drop any unterminated trailing batch so new appends start clean.
        if committed_end < buf.len() {
            file.set_len(committed_end as u64)?;
        }

        Ok((ValueLog { file, len: committed_end as u64 }, offsets, tag))
    }

    pub fn append_put(&mut self, key: &[u8], value: &[u8]) -> Result<ValueLocation> {
        let mut record = Vec::with_capacity(9 + key.len() + value.len());
        record.push(OP_PUT);
        record.extend_from_slice(&(key.len() as u32).to_le_bytes());
        record.extend_from_slice(key);
        record.extend_from_slice(&(value.len() as u32).to_le_bytes());
        record.extend_from_slice(value);
        let value_offset = self.len + 1 + 4 + key.len() as u64 + 4;
        self.append(&record)?;
        Ok(ValueLocation { offset: value_offset, len: value.len() as u32 })
    }

    pub fn append_del(&mut self, key: &[u8]) -> Result<()> {
        let mut record = Vec::with_capacity(5 + key.len());
        record.push(OP_DEL);
        record.extend_from_slice(&(key.len() as u32).to_le_bytes());
        record.extend_from_slice(key);
        self.append(&record)
    }

    pub fn append_commit(&mut self, tag: u64) -> Result<()> {
        let mut record = Vec::with_capacity(9);
        record.push(OP_COMMIT);
        record.extend_from_slice(&tag.to_le_bytes());
        self.append(&record)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn read_value(&self, location: ValueLocation) -> Result<Vec<u8>> {
        let mut value = vec![0u8; location.len as usize];
        self.file.read_exact_at(&mut value, location.offset)?;
        Ok(value)
    }

    fn append(&mut self, record: &[u8]) -> Result<()> {
        self.file.write_all_at(record, self.len)?;
        self.len += record.len() as u64;
        Ok(())
    }
}

/// Reads a `u32 LE` length followed by that many bytes. Returns the bytes
/// and the position after them, or `None` when the buffer is truncated.
fn take_chunk(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let ((start, end), after) = take_chunk_range(buf, pos)?;
    Some((&buf[start..end], after))
}

fn take_chunk_range(buf: &[u8], pos: usize) -> Option<((usize, usize), usize)> {
    if pos + 4 > buf.len() {
        return None;
    }
    let len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
    let start = pos + 4;
    let end = start.checked_add(len)?;
    if end > buf.len() {
        return None;
    }
    Some(((start, end), end))
}
