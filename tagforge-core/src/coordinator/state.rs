//! Session maps owned by the coordinator actor.

use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};
use tagforge_epc::TagIdentifier;

/// Words in a 96-bit EPC.
pub const EPC_WORDS: u8 = 6;
/// First EPC word after CRC and PC in the EPC bank.
pub const EPC_WORD_OFFSET: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TagState {
    Discovered,
    Assigned,
    WritePending,
    VerifyPending,
    VerifiedSuccess,
    VerifiedFailure,
    Recorded,
}

/// Full rewrite or trailing-words rewrite of the EPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WriteStyle {
    Full,
    Partial { words: u8 },
}

impl WriteStyle {
    /// Style implied by a hex payload length.
    pub fn from_payload(payload: &str) -> Self {
        let words = (payload.len() / 4) as u8;
        if words >= EPC_WORDS {
            WriteStyle::Full
        } else {
            WriteStyle::Partial { words }
        }
    }

    pub fn words(&self) -> u8 {
        match self {
            WriteStyle::Full => EPC_WORDS,
            WriteStyle::Partial { words } => *words,
        }
    }

    /// Word offset in the EPC bank for the payload.
    pub fn word_offset(&self) -> u16 {
        EPC_WORD_OFFSET + u16::from(EPC_WORDS - self.words())
    }

    /// Slice of `epc` (24 hex) written by this style.
    pub fn payload<'a>(&self, epc: &'a str) -> &'a str {
        let skip = usize::from(EPC_WORDS - self.words()) * 4;
        epc.get(skip..).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct TagEntry {
    pub state: TagState,
    /// EPC the tag carried when first seen.
    pub previous_epc: String,
    pub retries: u32,
    pub write_style: Option<WriteStyle>,
    pub write_started: Option<Instant>,
    pub verify_started: Option<Instant>,
    pub rssi: Option<f32>,
    pub antenna_port: Option<u16>,
}

impl TagEntry {
    fn new(state: TagState) -> Self {
        Self {
            state,
            previous_epc: String::new(),
            retries: 0,
            write_style: None,
            write_started: None,
            verify_started: None,
            rssi: None,
            antenna_port: None,
        }
    }
}

/// All per-session maps. Only the actor task touches this.
#[derive(Debug, Default)]
pub struct SessionState {
    expected: HashMap<TagIdentifier, String>,
    results: HashMap<TagIdentifier, String>,
    successes: HashMap<TagIdentifier, String>,
    processed: HashSet<TagIdentifier>,
    tags: HashMap<TagIdentifier, TagEntry>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    // === Discovery ===

    /// Mark `tid` discovered. Returns `true` the first time it is seen.
    pub fn discover(
        &mut self,
        tid: &TagIdentifier,
        epc: &str,
        rssi: Option<f32>,
        antenna_port: Option<u16>,
    ) -> bool {
        match self.tags.get_mut(tid) {
            Some(entry) => {
                entry.rssi = rssi.or(entry.rssi);
                entry.antenna_port = antenna_port.or(entry.antenna_port);
                false
            }
            None => {
                let mut entry = TagEntry::new(TagState::Discovered);
                entry.previous_epc = epc.to_ascii_uppercase();
                entry.rssi = rssi;
                entry.antenna_port = antenna_port;
                self.tags.insert(tid.clone(), entry);
                true
            }
        }
    }

    // === Assignment ===

    /// Upsert; the last writer wins.
    pub fn record_expected(&mut self, tid: &TagIdentifier, epc: &str) {
        self.expected.insert(tid.clone(), epc.to_ascii_uppercase());
        let entry = self
            .tags
            .entry(tid.clone())
            .or_insert_with(|| TagEntry::new(TagState::Assigned));
        if entry.state == TagState::Discovered {
            entry.state = TagState::Assigned;
        }
    }

    pub fn expected(&self, tid: &TagIdentifier) -> Option<&String> {
        self.expected.get(tid)
    }

    // === Results ===

    /// Record an outcome. Returns `true` when this call latched the first
    /// success for `tid`.
    pub fn record_result(&mut self, tid: &TagIdentifier, text: &str, was_success: bool) -> bool {
        self.processed.insert(tid.clone());
        self.results.insert(tid.clone(), text.to_string());
        if let Some(entry) = self.tags.get_mut(tid) {
            entry.state = TagState::Recorded;
        }
        if was_success && !self.successes.contains_key(tid) {
            self.successes.insert(tid.clone(), text.to_string());
            return true;
        }
        false
    }

    pub fn has_result(&self, tid: &TagIdentifier) -> bool {
        self.results.contains_key(tid)
    }

    pub fn result(&self, tid: &TagIdentifier) -> Option<&String> {
        self.results.get(tid)
    }

    pub fn is_processed(&self, tid: &TagIdentifier) -> bool {
        self.processed.contains(tid)
    }

    pub fn is_success(&self, tid: &TagIdentifier) -> bool {
        self.successes.contains_key(tid)
    }

    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    // === Per-tag lifecycle ===

    pub fn entry(&self, tid: &TagIdentifier) -> Option<&TagEntry> {
        self.tags.get(tid)
    }

    pub fn entry_mut(&mut self, tid: &TagIdentifier) -> &mut TagEntry {
        self.tags
            .entry(tid.clone())
            .or_insert_with(|| TagEntry::new(TagState::Discovered))
    }

    pub fn state(&self, tid: &TagIdentifier) -> Option<TagState> {
        self.tags.get(tid).map(|e| e.state)
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Drop every map in one step.
    pub fn clear(&mut self) {
        self.expected.clear();
        self.results.clear();
        self.successes.clear();
        self.processed.clear();
        self.tags.clear();
    }
}
