use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::LoadError;

/// Display summary cap. A 1-second and a 60-second sample both summarize to
/// this many blocks (fewer only when the sample itself has fewer frames).
pub const MAX_PEAKS: usize = 500;

/// One fully decoded sample. Immutable after construction and shared by
/// `Arc` between the cache, the pad registry and any voice playing it, so
/// the audio context reads it without locks.
#[derive(Debug)]
pub struct DecodedSample {
    /// Mono frames at the SOURCE rate. Multi-channel input is downmixed at
    /// decode time; rate mismatch is compensated at the voice cursor, never
    /// by a resampling pass.
    pub pcm: Vec<f32>,
    pub sample_rate: u32,
    /// Seconds, derived from frame count and source rate.
    pub duration: f32,
    /// Mean absolute amplitude per block, for waveform display.
    pub peaks: Vec<f32>,
}

impl DecodedSample {
    fn new(pcm: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate > 0 {
            pcm.len() as f32 / sample_rate as f32
        } else {
            0.0
        };
        let peaks = compute_peaks(&pcm);
        Self {
            pcm,
            sample_rate,
            duration,
            peaks,
        }
    }

    pub fn frames(&self) -> usize {
        self.pcm.len()
    }
}

/// Downsampled amplitude summary: `min(MAX_PEAKS, frames)` contiguous blocks,
/// mean absolute amplitude each. Deterministic for identical input.
pub fn compute_peaks(frames: &[f32]) -> Vec<f32> {
    if frames.is_empty() {
        return Vec::new();
    }
    let count = frames.len().min(MAX_PEAKS);
    let mut peaks = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * frames.len() / count;
        let end = ((i + 1) * frames.len() / count).max(start + 1);
        let block = &frames[start..end];
        let mean = block.iter().map(|s| s.abs()).sum::<f32>() / block.len() as f32;
        peaks.push(mean);
    }
    peaks
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Container {
    Wav,
    Compressed,
}

static KNOWN_EXTENSIONS: Lazy<HashMap<&'static str, Container>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("wav", Container::Wav);
    m.insert("wave", Container::Wav);
    m.insert("flac", Container::Compressed);
    m.insert("mp3", Container::Compressed);
    m.insert("ogg", Container::Compressed);
    m.insert("oga", Container::Compressed);
    m
});

fn sniff_container(name_hint: Option<&str>, bytes: &[u8]) -> Option<Container> {
    if let Some(name) = name_hint {
        if let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) {
            if let Some(container) = KNOWN_EXTENSIONS.get(ext.to_ascii_lowercase().as_str()) {
                return Some(*container);
            }
        }
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return Some(Container::Wav);
    }
    if bytes.len() >= 4 && (&bytes[0..4] == b"fLaC" || &bytes[0..4] == b"OggS") {
        return Some(Container::Compressed);
    }
    if bytes.len() >= 3 && (&bytes[0..3] == b"ID3" || (bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0))
    {
        return Some(Container::Compressed);
    }
    None
}

/// Decode an in-memory file into a `DecodedSample`. The whole payload is
/// already in memory, so every failure here is a format problem, not I/O.
pub fn decode_bytes(name_hint: Option<&str>, bytes: &[u8]) -> Result<DecodedSample, LoadError> {
    match sniff_container(name_hint, bytes) {
        Some(Container::Wav) => decode_wav(bytes),
        Some(Container::Compressed) => decode_compressed(bytes),
        None => Err(LoadError::UnsupportedFormat),
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedSample, LoadError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(map_header_err)?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(LoadError::CorruptHeader("zero channel count or rate".into()));
    }

    let expected = reader.len() as usize;
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_payload_err)?,
        hound::SampleFormat::Int => match spec.bits_per_sample {
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_payload_err)?,
            24 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 8_388_608.0))
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_payload_err)?,
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 2_147_483_648.0))
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_payload_err)?,
            bits => {
                return Err(LoadError::CorruptHeader(format!(
                    "unsupported bit depth: {bits}"
                )))
            }
        },
    };
    if samples.len() < expected {
        return Err(LoadError::Truncated);
    }

    Ok(DecodedSample::new(
        downmix(samples, spec.channels as usize),
        spec.sample_rate,
    ))
}

fn map_header_err(err: hound::Error) -> LoadError {
    // Anything that stops the header from parsing, EOF included, is a
    // corrupt header; Truncated is reserved for a short data chunk.
    LoadError::CorruptHeader(err.to_string())
}

fn map_payload_err(err: hound::Error) -> LoadError {
    // The header parsed; running out of bytes mid-payload means the data
    // chunk is shorter than it declared.
    match err {
        hound::Error::IoError(_) => LoadError::Truncated,
        other => LoadError::CorruptHeader(other.to_string()),
    }
}

fn decode_compressed(bytes: &[u8]) -> Result<DecodedSample, LoadError> {
    let source = rodio::Decoder::new(Cursor::new(bytes.to_vec())).map_err(|err| match err {
        rodio::decoder::DecoderError::UnrecognizedFormat => LoadError::UnsupportedFormat,
        other => LoadError::CorruptHeader(other.to_string()),
    })?;

    let sample_rate = rodio::Source::sample_rate(&source);
    let channels = rodio::Source::channels(&source) as usize;
    if channels == 0 || sample_rate == 0 {
        return Err(LoadError::CorruptHeader("zero channel count or rate".into()));
    }

    // Rodio decoders yield i16; map to f32 like the wav path.
    let samples: Vec<f32> = source.map(|s| s as f32 / i16::MAX as f32).collect();
    Ok(DecodedSample::new(downmix(samples, channels), sample_rate))
}

fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Identity of a load source: the path for file loads, a content hash for
/// byte payloads (file drops handed over as raw data).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum SourceKey {
    Path(PathBuf),
    Content(u64),
}

impl SourceKey {
    pub fn for_path(path: &Path) -> Self {
        SourceKey::Path(path.to_path_buf())
    }

    pub fn for_bytes(bytes: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        SourceKey::Content(hasher.finish())
    }
}

/// Decoded-buffer cache. Keyed by source identity; entries are reused on
/// repeated loads and only evicted while nothing else holds them.
pub struct SampleStore {
    cache: HashMap<SourceKey, Arc<DecodedSample>>,
    // Least-recently-assigned first.
    order: Vec<SourceKey>,
    capacity: usize,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: HashMap::new(),
            order: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&mut self, key: &SourceKey) -> Option<Arc<DecodedSample>> {
        let hit = self.cache.get(key).cloned();
        if hit.is_some() {
            self.touch(key);
        }
        hit
    }

    pub fn insert(&mut self, key: SourceKey, sample: Arc<DecodedSample>) {
        if self.cache.insert(key.clone(), sample).is_none() {
            self.order.push(key);
        } else {
            self.touch(&key);
        }
        self.evict_excess();
    }

    /// Synchronous convenience: read the file, decode, cache. The controller
    /// runs this on a worker thread because decode time is unbounded.
    pub fn load_path(&mut self, path: &Path) -> Result<Arc<DecodedSample>, LoadError> {
        let key = SourceKey::for_path(path);
        if let Some(hit) = self.get(&key) {
            debug!(path = %path.display(), "sample cache hit");
            return Ok(hit);
        }
        let bytes = fs::read(path)?;
        let decoded = Arc::new(decode_bytes(path.to_str(), &bytes)?);
        self.insert(key, decoded.clone());
        Ok(decoded)
    }

    pub fn load_bytes(&mut self, name_hint: Option<&str>, bytes: &[u8]) -> Result<Arc<DecodedSample>, LoadError> {
        let key = SourceKey::for_bytes(bytes);
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let decoded = Arc::new(decode_bytes(name_hint, bytes)?);
        self.insert(key, decoded.clone());
        Ok(decoded)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn touch(&mut self, key: &SourceKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn evict_excess(&mut self) {
        if self.cache.len() <= self.capacity {
            return;
        }
        let mut kept = Vec::with_capacity(self.order.len());
        let mut excess = self.cache.len() - self.capacity;
        for key in self.order.drain(..) {
            let unreferenced = self
                .cache
                .get(&key)
                .map(|s| Arc::strong_count(s) == 1)
                .unwrap_or(false);
            if excess > 0 && unreferenced {
                self.cache.remove(&key);
                excess -= 1;
            } else {
                kept.push(key);
            }
        }
        self.order = kept;
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Test fixture: a 16-bit PCM WAV file in memory.
#[cfg(test)]
pub(crate) fn wav_bytes(frames: &[f32], channels: u16, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in frames {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
