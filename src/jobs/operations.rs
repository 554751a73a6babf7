//! Media operations.
//!
//! On the wire (and on the job row) an operation is a tagged
//! `{type, params}` map. Before invocation the executor normalizes the
//! chain into typed records; an unrecognized type fails normalization with
//! `OP_UNKNOWN` before the media tool is ever spawned.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Wire-level operation, stored verbatim on the job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Operation {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

fn default_true() -> bool {
    true
}
fn default_quality() -> i64 {
    70
}
fn default_audio_format() -> String {
    "mp3".to_string()
}
fn default_audio_bitrate() -> i64 {
    192_000
}
fn default_multiplier() -> f64 {
    1.0
}
fn default_gif_fps() -> i64 {
    10
}
fn default_gif_width() -> i64 {
    480
}
fn default_bitrate() -> i64 {
    128_000
}
fn default_watermark_position() -> String {
    "bottomright".to_string()
}
fn default_watermark_font_size() -> i64 {
    24
}
fn default_font_color() -> String {
    "white".to_string()
}
fn default_watermark_opacity() -> f64 {
    0.8
}
fn default_text_position() -> String {
    "center".to_string()
}
fn default_text_font_size() -> i64 {
    48
}
fn default_bg_opacity() -> f64 {
    0.5
}
fn default_animation() -> String {
    "none".to_string()
}
fn default_audio_mode() -> String {
    "mix".to_string()
}
fn default_loop_count() -> i64 {
    2
}
fn default_thumbnail_timestamp() -> String {
    "00:00:01".to_string()
}
fn default_thumbnail_width() -> i64 {
    320
}
fn default_contrast() -> f64 {
    1.0
}
fn default_saturation() -> f64 {
    1.0
}
fn default_gamma() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimParams {
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeParams {
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    #[serde(default = "default_true")]
    pub maintain_aspect: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressParams {
    /// 1-100, mapped to CRF (lower CRF = better quality).
    #[serde(default = "default_quality")]
    pub quality: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertFormatParams {
    #[serde(default)]
    pub target_format: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateParams {
    #[serde(default)]
    pub degrees: i64,
    #[serde(default)]
    pub flip_horizontal: bool,
    #[serde(default)]
    pub flip_vertical: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropParams {
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractAudioParams {
    #[serde(default = "default_audio_format")]
    pub format: String,
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSpeedParams {
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGifParams {
    #[serde(default = "default_gif_fps")]
    pub fps: i64,
    #[serde(default = "default_gif_width")]
    pub width: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBitrateParams {
    #[serde(default = "default_bitrate")]
    pub bitrate: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustVolumeParams {
    #[serde(default)]
    pub db: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FadeParams {
    #[serde(default)]
    pub fade_in: f64,
    #[serde(default)]
    pub fade_out: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkParams {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_watermark_position")]
    pub position: String,
    #[serde(default = "default_watermark_font_size")]
    pub font_size: i64,
    #[serde(default = "default_font_color")]
    pub font_color: String,
    #[serde(default = "default_watermark_opacity")]
    pub opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTextParams {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_text_position")]
    pub position: String,
    #[serde(default = "default_text_font_size")]
    pub font_size: i64,
    #[serde(default = "default_font_color")]
    pub font_color: String,
    #[serde(default)]
    pub bg_color: String,
    #[serde(default = "default_bg_opacity")]
    pub bg_opacity: f64,
    #[serde(default)]
    pub start_time: f64,
    /// 0 means the entire video.
    #[serde(default)]
    pub end_time: f64,
    #[serde(default = "default_animation")]
    pub animation: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAudioParams {
    /// File id on the wire; resolved to a storage path at admission.
    #[serde(default)]
    pub audio_path: String,
    /// "mix" or "replace".
    #[serde(default = "default_audio_mode")]
    pub mode: String,
    #[serde(default = "default_multiplier")]
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopParams {
    #[serde(default = "default_loop_count")]
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailParams {
    #[serde(default = "default_thumbnail_timestamp")]
    pub timestamp: String,
    #[serde(default = "default_thumbnail_width")]
    pub width: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiltersParams {
    /// -1..1, 0 = no change.
    #[serde(default)]
    pub brightness: f64,
    /// 0..2, 1 = no change.
    #[serde(default = "default_contrast")]
    pub contrast: f64,
    /// 0..3, 1 = no change.
    #[serde(default = "default_saturation")]
    pub saturation: f64,
    /// 0.1..10, 1 = no change.
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// Degrees, -180..180.
    #[serde(default)]
    pub hue: f64,
    /// 0..10, 0 = no blur.
    #[serde(default)]
    pub blur: f64,
    /// 0..5, 0 = no sharpen.
    #[serde(default)]
    pub sharpen: f64,
    #[serde(default)]
    pub vignette: bool,
    #[serde(default)]
    pub grayscale: bool,
    #[serde(default)]
    pub sepia: bool,
    #[serde(default)]
    pub negative: bool,
}

/// A normalized operation, ready for argument building.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Trim(TrimParams),
    Resize(ResizeParams),
    Compress(CompressParams),
    ConvertFormat(ConvertFormatParams),
    Rotate(RotateParams),
    Crop(CropParams),
    ExtractAudio(ExtractAudioParams),
    ChangeSpeed(ChangeSpeedParams),
    CreateGif(CreateGifParams),
    ChangeBitrate(ChangeBitrateParams),
    AdjustVolume(AdjustVolumeParams),
    FadeInOut(FadeParams),
    AddWatermark(WatermarkParams),
    AddText(AddTextParams),
    AddAudio(AddAudioParams),
    RemoveAudio,
    Reverse,
    Loop(LoopParams),
    Thumbnail(ThumbnailParams),
    Filters(FiltersParams),
    Merge,
}

impl Op {
    /// Wire name of this operation.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Trim(_) => "trim",
            Self::Resize(_) => "resize",
            Self::Compress(_) => "compress",
            Self::ConvertFormat(_) => "convertFormat",
            Self::Rotate(_) => "rotate",
            Self::Crop(_) => "crop",
            Self::ExtractAudio(_) => "extractAudio",
            Self::ChangeSpeed(_) => "changeSpeed",
            Self::CreateGif(_) => "createGif",
            Self::ChangeBitrate(_) => "changeBitrate",
            Self::AdjustVolume(_) => "adjustVolume",
            Self::FadeInOut(_) => "fadeInOut",
            Self::AddWatermark(_) => "addWatermark",
            Self::AddText(_) => "addText",
            Self::AddAudio(_) => "addAudio",
            Self::RemoveAudio => "removeAudio",
            Self::Reverse => "reverse",
            Self::Loop(_) => "loop",
            Self::Thumbnail(_) => "thumbnail",
            Self::Filters(_) => "filters",
            Self::Merge => "merge",
        }
    }
}

fn params<T: serde::de::DeserializeOwned>(op: &Operation) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(op.params.clone())).map_err(|e| {
        Error::validation(format!("invalid params for operation '{}': {}", op.kind, e))
    })
}

/// Normalize one wire operation into its typed record.
pub fn normalize(op: &Operation) -> Result<Op> {
    match op.kind.as_str() {
        "trim" => Ok(Op::Trim(params(op)?)),
        "resize" => Ok(Op::Resize(params(op)?)),
        "compress" => Ok(Op::Compress(params(op)?)),
        "convertFormat" => Ok(Op::ConvertFormat(params(op)?)),
        "rotate" => Ok(Op::Rotate(params(op)?)),
        "crop" => Ok(Op::Crop(params(op)?)),
        "extractAudio" => Ok(Op::ExtractAudio(params(op)?)),
        "changeSpeed" => Ok(Op::ChangeSpeed(params(op)?)),
        "createGif" => Ok(Op::CreateGif(params(op)?)),
        "changeBitrate" => Ok(Op::ChangeBitrate(params(op)?)),
        "adjustVolume" => Ok(Op::AdjustVolume(params(op)?)),
        "fadeInOut" => Ok(Op::FadeInOut(params(op)?)),
        "addWatermark" => Ok(Op::AddWatermark(params(op)?)),
        "addText" => Ok(Op::AddText(params(op)?)),
        "addAudio" => Ok(Op::AddAudio(params(op)?)),
        "removeAudio" => Ok(Op::RemoveAudio),
        "reverse" => Ok(Op::Reverse),
        "loop" => Ok(Op::Loop(params(op)?)),
        "thumbnail" => Ok(Op::Thumbnail(params(op)?)),
        "filters" => Ok(Op::Filters(params(op)?)),
        "merge" => Ok(Op::Merge),
        other => Err(Error::UnknownOperation(other.to_string())),
    }
}

/// Normalize a whole chain, failing on the first unknown type.
pub fn normalize_all(operations: &[Operation]) -> Result<Vec<Op>> {
    operations.iter().map(normalize).collect()
}

/// True when the chain contains a merge step.
pub fn contains_merge(operations: &[Operation]) -> bool {
    operations.iter().any(|op| op.kind == "merge")
}
