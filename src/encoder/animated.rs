//! Animated image encoder capability and its tunables
//!
//! The overlay pipeline only needs three calls from an image encoder: set it
//! up for a canvas, add RGBA frames with millisecond timestamps, and collect
//! the finished file. [`WebPConfig`] is the sparse tunable record a host may
//! pass along; unset fields keep the encoder's defaults.

use crate::utils::error::{IntoTranscodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Quality used when the config leaves it unset
pub const DEFAULT_QUALITY: f32 = 70.0;

/// Compression method (speed/size trade-off, 0..=6) used when unset
pub const DEFAULT_METHOD: i32 = 0;

/// Thread level used when unset
pub const DEFAULT_THREAD_LEVEL: i32 = 1;

/// Frame-sequence encoder producing one image container
pub trait AnimatedImageEncoder: Send {
    /// Prepare for frames of `width` x `height`
    fn init(&mut self, width: u32, height: u32, config: &WebPConfig) -> Result<()>;

    /// Append one tightly packed RGBA frame
    fn add_frame(&mut self, rgba: &[u8], timestamp_ms: i64) -> Result<()>;

    /// Finish the animation and return the encoded file
    fn finalize(&mut self) -> Result<Vec<u8>>;
}

/// Content hint for the encoder's presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageHint {
    Default,
    Picture,
    Photo,
    Graph,
}

/// Optional WebP tunables, camelCase on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebPConfig {
    pub lossless: Option<bool>,
    /// 0..=100
    pub quality: Option<f32>,
    /// 0 (fast) ..= 6 (slow, smaller)
    pub method: Option<i32>,
    pub image_hint: Option<ImageHint>,
    pub target_size: Option<i32>,
    pub target_psnr: Option<f32>,
    pub segments: Option<i32>,
    pub sns_strength: Option<i32>,
    pub filter_strength: Option<i32>,
    pub filter_sharpness: Option<i32>,
    pub filter_type: Option<i32>,
    pub autofilter: Option<bool>,
    pub alpha_compression: Option<i32>,
    pub alpha_filtering: Option<i32>,
    pub alpha_quality: Option<i32>,
    pub pass: Option<i32>,
    pub show_compressed: Option<bool>,
    pub preprocessing: Option<i32>,
    pub partitions: Option<i32>,
    pub partition_limit: Option<i32>,
    pub emulate_jpeg_size: Option<bool>,
    pub thread_level: Option<i32>,
    pub low_memory: Option<bool>,
    pub near_lossless: Option<i32>,
    pub exact: Option<bool>,
}

impl WebPConfig {
    /// Parse the host's JSON map form
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).config_err("Invalid WebP config")
    }

    /// Read the JSON map form from a file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn effective_quality(&self) -> f32 {
        self.quality.unwrap_or(DEFAULT_QUALITY).clamp(0.0, 100.0)
    }

    pub fn effective_method(&self) -> i32 {
        self.method.unwrap_or(DEFAULT_METHOD).clamp(0, 6)
    }

    pub fn effective_thread_level(&self) -> i32 {
        self.thread_level.unwrap_or(DEFAULT_THREAD_LEVEL)
    }

    /// Names of the fields that are set, for encoders that only honour a subset
    pub fn set_fields(&self) -> Vec<&'static str> {
        let flags: [(&'static str, bool); 25] = [
            ("lossless", self.lossless.is_some()),
            ("quality", self.quality.is_some()),
            ("method", self.method.is_some()),
            ("imageHint", self.image_hint.is_some()),
            ("targetSize", self.target_size.is_some()),
            ("targetPsnr", self.target_psnr.is_some()),
            ("segments", self.segments.is_some()),
            ("snsStrength", self.sns_strength.is_some()),
            ("filterStrength", self.filter_strength.is_some()),
            ("filterSharpness", self.filter_sharpness.is_some()),
            ("filterType", self.filter_type.is_some()),
            ("autofilter", self.autofilter.is_some()),
            ("alphaCompression", self.alpha_compression.is_some()),
            ("alphaFiltering", self.alpha_filtering.is_some()),
            ("alphaQuality", self.alpha_quality.is_some()),
            ("pass", self.pass.is_some()),
            ("showCompressed", self.show_compressed.is_some()),
            ("preprocessing", self.preprocessing.is_some()),
            ("partitions", self.partitions.is_some()),
            ("partitionLimit", self.partition_limit.is_some()),
            ("emulateJpegSize", self.emulate_jpeg_size.is_some()),
            ("threadLevel", self.thread_level.is_some()),
            ("lowMemory", self.low_memory.is_some()),
            ("nearLossless", self.near_lossless.is_some()),
            ("exact", self.exact.is_some()),
        ];
        flags.iter().filter(|(_, set)| *set).map(|(name, _)| *name).collect()
    }
}
