use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::sample_store::DecodedSample;

pub const NUM_PADS: usize = 32;
pub const LABEL_MAX_CHARS: usize = 8;

/// One playback slot. Created empty at startup, never destroyed, only
/// cleared; all mutation goes through validated transport commands.
#[derive(Debug, Clone)]
pub struct Pad {
    pub id: usize,
    pub label: String,
    pub is_muted: bool,
    pub is_solo: bool,
    /// Normalized playable sub-range, `trim_start < trim_end`.
    pub trim_start: f32,
    pub trim_end: f32,
    pub sample: Option<Arc<DecodedSample>>,
    pub source: Option<PathBuf>,
}

impl Pad {
    fn empty(id: usize) -> Self {
        Self {
            id,
            label: String::new(),
            is_muted: false,
            is_solo: false,
            trim_start: 0.0,
            trim_end: 1.0,
            sample: None,
            source: None,
        }
    }

    pub fn has_sample(&self) -> bool {
        self.sample.is_some()
    }
}

/// Display label: file stem, uppercased, truncated.
pub fn pad_label(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .chars()
        .take(LABEL_MAX_CHARS)
        .collect::<String>()
        .to_uppercase()
}

#[derive(Debug)]
pub struct PadRegistry {
    pads: Vec<Pad>,
}

impl PadRegistry {
    pub fn new() -> Self {
        Self {
            pads: (0..NUM_PADS).map(Pad::empty).collect(),
        }
    }

    pub fn get(&self, pad_id: usize) -> Option<&Pad> {
        self.pads.get(pad_id)
    }

    pub fn get_mut(&mut self, pad_id: usize) -> Option<&mut Pad> {
        self.pads.get_mut(pad_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pad> {
        self.pads.iter()
    }

    /// A successful load replaces the pad's sample, relabels it and resets
    /// the trim region to the full sample.
    pub fn assign(&mut self, pad_id: usize, sample: Arc<DecodedSample>, source: PathBuf) {
        if let Some(pad) = self.pads.get_mut(pad_id) {
            pad.label = pad_label(&source);
            pad.sample = Some(sample);
            pad.source = Some(source);
            pad.trim_start = 0.0;
            pad.trim_end = 1.0;
        }
    }

    /// Releases the pad's sample reference. The cache keeps its own copy, so
    /// other pads sharing the buffer are unaffected.
    pub fn clear(&mut self, pad_id: usize) {
        if let Some(pad) = self.pads.get_mut(pad_id) {
            pad.label.clear();
            pad.sample = None;
            pad.source = None;
            pad.trim_start = 0.0;
            pad.trim_end = 1.0;
        }
    }

    /// Applies a trim change if it keeps `start < end` inside [0,1];
    /// otherwise the previous region stays untouched.
    pub fn set_trim(&mut self, pad_id: usize, start: f32, end: f32) -> bool {
        let valid = start.is_finite() && end.is_finite() && (0.0..1.0).contains(&start) && start < end && end <= 1.0;
        if !valid {
            return false;
        }
        match self.pads.get_mut(pad_id) {
            Some(pad) => {
                pad.trim_start = start;
                pad.trim_end = end;
                true
            }
            None => false,
        }
    }

    pub fn set_mute(&mut self, pad_id: usize, muted: bool) {
        if let Some(pad) = self.pads.get_mut(pad_id) {
            pad.is_muted = muted;
        }
    }

    pub fn set_solo(&mut self, pad_id: usize, solo: bool) {
        if let Some(pad) = self.pads.get_mut(pad_id) {
            pad.is_solo = solo;
        }
    }
}

impl Default for PadRegistry {
    fn default() -> Self {
        Self::new()
    }
}
