//! The staleness database: fingerprints recorded by previous runs, used
//! to decide whether a rule application is still valid.
//!
//! Two tables, both keyed by the fingerprint of (target set, directory):
//! one maps to the fingerprint of the recipe text that last ran, one maps
//! each declared prerequisite to the fingerprint of its content.  Entries
//! are only written after a recipe completes without fatal failure.
//!
//! The database is persisted as one gzip-compressed file per cache scope.
//! A missing or corrupt file is a cold cache, never an error.

use crate::hash;
use anyhow::bail;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rustc_hash::FxHashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 6] = b"mekdb1";

/// Result of a fingerprint lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Recorded, and unchanged.
    Match,
    /// Recorded, but different.
    Mismatch,
    /// Never recorded.
    Untracked,
}

#[derive(Default)]
pub struct Db {
    path: Option<PathBuf>,
    recipes: FxHashMap<u64, u64>,
    prereqs: FxHashMap<u64, FxHashMap<String, u64>>,
    dirty: bool,
}

impl Db {
    /// An in-memory database that is never persisted.
    pub fn transient() -> Db {
        Db::default()
    }

    /// Open the database file inside the cache directory `dir`.  Absence
    /// or corruption yields an empty database.
    pub fn open(dir: &Path) -> Db {
        let path = dir.join("db");
        let mut db = Db {
            path: Some(path.clone()),
            ..Db::default()
        };
        if let Ok(bytes) = std::fs::read(&path) {
            if db.decode(&bytes).is_err() {
                db.recipes.clear();
                db.prereqs.clear();
            }
        }
        db
    }

    /// Whether the recipe text for this rule application is recorded and
    /// unchanged.
    pub fn has_recipe(&self, targets: &[String], recipe: &str, dir: &str) -> bool {
        self.recipe_state(targets, recipe, dir) == Lookup::Match
    }

    pub fn recipe_state(&self, targets: &[String], recipe: &str, dir: &str) -> Lookup {
        match self.recipes.get(&hash::db_key(targets, dir)) {
            None => Lookup::Untracked,
            Some(&fp) if fp == hash::of_strings([recipe]) => Lookup::Match,
            Some(_) => Lookup::Mismatch,
        }
    }

    pub fn insert_recipe(&mut self, targets: &[String], recipe: &str, dir: &str) {
        self.recipes
            .insert(hash::db_key(targets, dir), hash::of_strings([recipe]));
        self.dirty = true;
    }

    /// Look up one declared prerequisite's recorded content fingerprint.
    pub fn prereq_state(
        &self,
        targets: &[String],
        dir: &str,
        prereq: &str,
        fingerprint: u64,
    ) -> Lookup {
        match self
            .prereqs
            .get(&hash::db_key(targets, dir))
            .and_then(|m| m.get(prereq))
        {
            None => Lookup::Untracked,
            Some(&fp) if fp == fingerprint => Lookup::Match,
            Some(_) => Lookup::Mismatch,
        }
    }

    pub fn insert_prereq(&mut self, targets: &[String], dir: &str, prereq: &str, fingerprint: u64) {
        self.prereqs
            .entry(hash::db_key(targets, dir))
            .or_default()
            .insert(prereq.to_string(), fingerprint);
        self.dirty = true;
    }

    /// Persist to disk.  A no-op for transient databases or when nothing
    /// changed since the last save.
    pub fn save(&mut self) -> anyhow::Result<()> {
        let path = match (&self.path, self.dirty) {
            (Some(path), true) => path,
            _ => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.encode()?)?;
        self.dirty = false;
        Ok(())
    }

    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(self.recipes.len() as u32).to_le_bytes());
        for (&key, &fp) in &self.recipes {
            raw.extend_from_slice(&key.to_le_bytes());
            raw.extend_from_slice(&fp.to_le_bytes());
        }
        raw.extend_from_slice(&(self.prereqs.len() as u32).to_le_bytes());
        for (&key, entries) in &self.prereqs {
            raw.extend_from_slice(&key.to_le_bytes());
            raw.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for (name, &fp) in entries {
                raw.extend_from_slice(&(name.len() as u32).to_le_bytes());
                raw.extend_from_slice(name.as_bytes());
                raw.extend_from_slice(&fp.to_le_bytes());
            }
        }

        let mut out = Vec::from(&MAGIC[..]);
        let mut enc = GzEncoder::new(&mut out, Compression::default());
        enc.write_all(&raw)?;
        enc.finish()?;
        Ok(out)
    }

    fn decode(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let rest = match bytes.strip_prefix(&MAGIC[..]) {
            Some(rest) => rest,
            None => bail!("bad database header"),
        };
        let mut raw = Vec::new();
        GzDecoder::new(rest).read_to_end(&mut raw)?;
        let mut cur = Cursor { buf: &raw, pos: 0 };

        for _ in 0..cur.u32()? {
            let key = cur.u64()?;
            let fp = cur.u64()?;
            self.recipes.insert(key, fp);
        }
        for _ in 0..cur.u32()? {
            let key = cur.u64()?;
            let n = cur.u32()?;
            let entries = self.prereqs.entry(key).or_default();
            for _ in 0..n {
                let len = cur.u32()? as usize;
                let name = String::from_utf8(cur.take(len)?.to_vec())?;
                let fp = cur.u64()?;
                entries.insert(name, fp);
            }
        }
        Ok(())
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        match self.buf.get(self.pos..self.pos + n) {
            Some(bytes) => {
                self.pos += n;
                Ok(bytes)
            }
            None => bail!("truncated database"),
        }
    }

    fn u32(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> anyhow::Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}
