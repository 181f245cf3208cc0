// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistent session memory: the on-disk record of "what was last
//! delivered" that bridges process restarts (spec section 4.8).
//!
//! Grounded on the donor audit log's `write_all` + `sync_all` pairing
//! (`security/audit/mod.rs`), generalized from append-only to
//! replace-the-whole-record, since this file holds one small snapshot
//! rather than a growing log: every update writes a fresh temp file, fsyncs
//! it, renames it over the live path, then fsyncs the containing directory
//! — so a crash lands on either the old record or the new one, never a
//! half-written file.

use crate::error::{FmtpError, FmtpResult};
use crate::wire::bop::Signature;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAGIC: &[u8; 4] = b"FMS1";

/// One session memory file, shared between the supervisor (which opens and
/// closes it) and the worker threads of each iteration (which update it as
/// products finalize and missing-BOP requests are issued).
pub type SharedSessionMemory = Arc<Mutex<SessionMemory>>;

/// Persistent record for one (source, feed) pair.
pub struct SessionMemory {
    path: PathBuf,
    fsync: bool,
    last_signature: Option<Signature>,
    missed_queue: VecDeque<u32>,
}

impl SessionMemory {
    /// Open (creating if absent) the session memory file for `source_id` /
    /// `feed_spec` under `dir`.
    pub fn open(dir: impl AsRef<Path>, source_id: &str, feed_spec: &str, fsync: bool) -> FmtpResult<Self> {
        fs::create_dir_all(dir.as_ref()).map_err(|e| FmtpError::SessionMemory(e.to_string()))?;
        let path = dir.as_ref().join(file_name(source_id, feed_spec));

        let (last_signature, missed_queue) = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| FmtpError::SessionMemory(e.to_string()))?;
            decode(&bytes).map_err(|e| FmtpError::SessionMemory(e.to_string()))?
        } else {
            (None, VecDeque::new())
        };

        let memory = Self {
            path,
            fsync,
            last_signature,
            missed_queue,
        };
        if !memory.path.exists() {
            memory.persist()?;
        }
        Ok(memory)
    }

    #[must_use]
    pub fn get_last_signature(&self) -> Option<Signature> {
        self.last_signature
    }

    pub fn set_last_signature(&mut self, signature: Signature) -> FmtpResult<()> {
        self.last_signature = Some(signature);
        self.persist()
    }

    pub fn enqueue_missed(&mut self, index: u32) -> FmtpResult<()> {
        self.missed_queue.push_back(index);
        self.persist()
    }

    pub fn dequeue_missed(&mut self) -> FmtpResult<Option<u32>> {
        let front = self.missed_queue.pop_front();
        if front.is_some() {
            self.persist()?;
        }
        Ok(front)
    }

    /// Write-temp, fsync, rename, fsync-directory: the crash-safe update
    /// sequence required by spec section 4.8's recovery invariant.
    fn persist(&self) -> FmtpResult<()> {
        let bytes = encode(self.last_signature, &self.missed_queue);
        let tmp_path = self.path.with_extension("tmp");

        let mut tmp = File::create(&tmp_path).map_err(|e| FmtpError::SessionMemory(e.to_string()))?;
        tmp.write_all(&bytes)
            .map_err(|e| FmtpError::SessionMemory(e.to_string()))?;
        if self.fsync {
            tmp.sync_all().map_err(|e| FmtpError::SessionMemory(e.to_string()))?;
        }
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(|e| FmtpError::SessionMemory(e.to_string()))?;

        if self.fsync {
            if let Some(parent) = self.path.parent() {
                let dir = File::open(parent).map_err(|e| FmtpError::SessionMemory(e.to_string()))?;
                dir.sync_all().map_err(|e| FmtpError::SessionMemory(e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn file_name(source_id: &str, feed_spec: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    };
    format!("{}.{}.fmtpmem", sanitize(source_id), sanitize(feed_spec))
}

fn encode(last_signature: Option<Signature>, missed: &VecDeque<u32>) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 1 + 16 + 4 + missed.len() * 4);
    out.extend_from_slice(MAGIC);
    match last_signature {
        Some(sig) => {
            out.push(1);
            out.extend_from_slice(&sig);
        }
        None => out.push(0),
    }
    out.extend_from_slice(&(missed.len() as u32).to_be_bytes());
    for index in missed {
        out.extend_from_slice(&index.to_be_bytes());
    }
    out
}

fn decode(bytes: &[u8]) -> Result<(Option<Signature>, VecDeque<u32>), &'static str> {
    if bytes.len() < 4 + 1 {
        return Err("session memory file shorter than fixed header");
    }
    if &bytes[0..4] != MAGIC {
        return Err("session memory file has unrecognized magic");
    }
    let mut cursor = 4;
    let has_signature = bytes[cursor] != 0;
    cursor += 1;

    let last_signature = if has_signature {
        if bytes.len() < cursor + 16 {
            return Err("session memory file truncated before signature");
        }
        let mut sig = [0u8; 16];
        sig.copy_from_slice(&bytes[cursor..cursor + 16]);
        cursor += 16;
        Some(sig)
    } else {
        None
    };

    if bytes.len() < cursor + 4 {
        return Err("session memory file truncated before queue length");
    }
    let queue_len = u32::from_be_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
    cursor += 4;

    if bytes.len() < cursor + queue_len * 4 {
        return Err("session memory file truncated before queue contents");
    }
    let mut queue = VecDeque::with_capacity(queue_len);
    for _ in 0..queue_len {
        let index = u32::from_be_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
        queue.push_back(index);
        cursor += 4;
    }

    Ok((last_signature, queue))
}

/// Read back a session memory file without holding a live [`SessionMemory`]
/// handle. Used by tests asserting crash-recovery semantics.
#[cfg(test)]
fn read_raw(path: &Path) -> (Option<Signature>, VecDeque<u32>) {
    let mut bytes = Vec::new();
    File::open(path).unwrap().read_to_end(&mut bytes).unwrap();
    decode(&bytes).unwrap()
}
