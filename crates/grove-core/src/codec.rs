//! Binary format for the variable and container tables saved between sessions.
//!
//! Integers are big-endian. Strings and entries go through incremental
//! dictionaries: the first occurrence writes a fresh id followed by the full
//! payload, later occurrences write only the id. Entries are identified by
//! `Arc` identity, so an entry shared by many containers is stored once and
//! decodes back into a single shared `Arc`.
//!
//! Layout: version, then per project its name and containers (path plus
//! entries), then the variables (name plus path).

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::CodecError;
use crate::model::{AccessKind, AccessRule, Entry, EntryKind, ProjectId};

pub const STATE_FORMAT_VERSION: i32 = 1;

/// Variables and per-project container contents as persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    pub containers: BTreeMap<ProjectId, BTreeMap<PathBuf, Vec<Arc<Entry>>>>,
    pub variables: BTreeMap<String, PathBuf>,
}

impl PersistedState {
    pub fn container_count(&self) -> usize {
        self.containers.values().map(BTreeMap::len).sum()
    }
}

pub fn encode(state: &PersistedState) -> Vec<u8> {
    let mut encoder = Encoder::default();
    encoder.write_i32(STATE_FORMAT_VERSION);

    encoder.write_u32(state.containers.len() as u32);
    for (project, containers) in &state.containers {
        encoder.write_string(project.name());
        encoder.write_u32(containers.len() as u32);
        for (path, entries) in containers {
            encoder.write_path(Some(path));
            encoder.write_u32(entries.len() as u32);
            for entry in entries {
                encoder.write_entry(entry);
            }
        }
    }

    encoder.write_u32(state.variables.len() as u32);
    for (name, path) in &state.variables {
        encoder.write_string(name);
        encoder.write_path(Some(path));
    }
    encoder.out
}

pub fn decode(bytes: &[u8]) -> Result<PersistedState, CodecError> {
    let mut decoder = Decoder::new(bytes);
    let version = decoder.read_i32()?;
    if version != STATE_FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let mut state = PersistedState::default();
    let project_count = decoder.read_u32()?;
    for _ in 0..project_count {
        let project = ProjectId::new(decoder.read_string()?);
        let container_count = decoder.read_u32()?;
        let mut containers = BTreeMap::new();
        for _ in 0..container_count {
            let path = decoder.read_required_path()?;
            let entry_count = decoder.read_u32()?;
            let mut entries = Vec::with_capacity(decoder.bounded(entry_count));
            for _ in 0..entry_count {
                entries.push(decoder.read_entry()?);
            }
            containers.insert(path, entries);
        }
        state.containers.insert(project, containers);
    }

    let variable_count = decoder.read_u32()?;
    for _ in 0..variable_count {
        let name = decoder.read_string()?;
        let path = decoder.read_required_path()?;
        state.variables.insert(name, path);
    }

    let remaining = decoder.remaining();
    if remaining > 0 {
        return Err(CodecError::TrailingBytes(remaining));
    }
    Ok(state)
}

// ── Encoder ─────────────────────────────────────────────────

#[derive(Default)]
struct Encoder {
    out: Vec<u8>,
    strings: HashMap<String, u32>,
    entries: HashMap<*const Entry, u32>,
}

impl Encoder {
    fn write_i32(&mut self, value: i32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn write_u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn write_bool(&mut self, value: bool) {
        self.out.push(u8::from(value));
    }

    fn write_string(&mut self, value: &str) {
        if let Some(&id) = self.strings.get(value) {
            self.write_u32(id);
            return;
        }
        let id = self.strings.len() as u32;
        self.strings.insert(value.to_string(), id);
        self.write_u32(id);
        self.write_u32(value.len() as u32);
        self.out.extend_from_slice(value.as_bytes());
    }

    fn write_path(&mut self, path: Option<&PathBuf>) {
        match path {
            Some(path) => {
                self.write_bool(true);
                self.write_string(&crate::model::portable(path));
            }
            None => self.write_bool(false),
        }
    }

    fn write_strings(&mut self, values: &[String]) {
        self.write_u32(values.len() as u32);
        for value in values {
            self.write_string(value);
        }
    }

    fn write_entry(&mut self, entry: &Arc<Entry>) {
        let key = Arc::as_ptr(entry);
        if let Some(&id) = self.entries.get(&key) {
            self.write_u32(id);
            return;
        }
        let id = self.entries.len() as u32;
        self.entries.insert(key, id);
        self.write_u32(id);

        self.write_u32(entry.kind.code());
        self.write_path(Some(&entry.path));
        self.write_strings(&entry.inclusion_patterns);
        self.write_strings(&entry.exclusion_patterns);
        self.write_path(entry.source_attachment.as_ref());
        self.write_path(entry.source_attachment_root.as_ref());
        self.write_path(entry.output_location.as_ref());
        self.write_bool(entry.exported);

        self.write_u32(entry.access_rules.len() as u32);
        for rule in &entry.access_rules {
            self.write_u32(rule.kind.code());
            self.write_string(&rule.pattern);
        }

        self.write_u32(entry.extra_attributes.len() as u32);
        for (name, value) in &entry.extra_attributes {
            self.write_string(name);
            self.write_string(value);
        }
    }
}

// ── Decoder ─────────────────────────────────────────────────

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    strings: Vec<Arc<str>>,
    entries: Vec<Arc<Entry>>,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Decoder {
            bytes,
            pos: 0,
            strings: Vec::new(),
            entries: Vec::new(),
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Capacity hint that a corrupt count cannot blow up.
    fn bounded(&self, count: u32) -> usize {
        (count as usize).min(self.remaining())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(CodecError::Truncated(self.pos))?;
        let bytes = self.bytes;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_word(&mut self) -> Result<[u8; 4], CodecError> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4)?);
        Ok(word)
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.read_word()?))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.read_word()?))
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.take(1)?[0] != 0)
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let id = self.read_u32()?;
        let known = self.strings.len();
        match (id as usize).cmp(&known) {
            std::cmp::Ordering::Less => Ok(self.strings[id as usize].to_string()),
            std::cmp::Ordering::Equal => {
                let len = self.read_u32()? as usize;
                let start = self.pos;
                let bytes = self.take(len)?;
                let value = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8(start))?;
                self.strings.push(Arc::from(value));
                Ok(value.to_string())
            }
            std::cmp::Ordering::Greater => Err(CodecError::UnexpectedId {
                table: "string",
                id,
                known,
            }),
        }
    }

    fn read_path(&mut self) -> Result<Option<PathBuf>, CodecError> {
        if !self.read_bool()? {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(self.read_string()?)))
    }

    fn read_required_path(&mut self) -> Result<PathBuf, CodecError> {
        let pos = self.pos;
        self.read_path()?.ok_or(CodecError::Truncated(pos))
    }

    fn read_strings(&mut self) -> Result<Vec<String>, CodecError> {
        let count = self.read_u32()?;
        let mut values = Vec::with_capacity(self.bounded(count));
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }

    fn read_entry(&mut self) -> Result<Arc<Entry>, CodecError> {
        let id = self.read_u32()?;
        let known = self.entries.len();
        if (id as usize) < known {
            return Ok(self.entries[id as usize].clone());
        }
        if id as usize > known {
            return Err(CodecError::UnexpectedId {
                table: "entry",
                id,
                known,
            });
        }

        let code = self.read_u32()?;
        let kind = EntryKind::from_code(code).ok_or(CodecError::UnknownCode {
            what: "entry kind",
            code,
        })?;
        let path = self.read_required_path()?;
        let mut entry = Entry::new(kind, path);
        entry.inclusion_patterns = self.read_strings()?;
        entry.exclusion_patterns = self.read_strings()?;
        entry.source_attachment = self.read_path()?;
        entry.source_attachment_root = self.read_path()?;
        entry.output_location = self.read_path()?;
        entry.exported = self.read_bool()?;

        let rule_count = self.read_u32()?;
        for _ in 0..rule_count {
            let code = self.read_u32()?;
            let kind = AccessKind::from_code(code).ok_or(CodecError::UnknownCode {
                what: "access rule kind",
                code,
            })?;
            let pattern = self.read_string()?;
            entry.access_rules.push(AccessRule::new(pattern, kind));
        }

        let attribute_count = self.read_u32()?;
        for _ in 0..attribute_count {
            let name = self.read_string()?;
            let value = self.read_string()?;
            entry.extra_attributes.push((name, value));
        }

        let entry = Arc::new(entry);
        self.entries.push(entry.clone());
        Ok(entry)
    }
}
