//! 数据结构模块
//!
//! 定义钢琴卷帘使用的不可变音符数据、网格尺寸以及音高命名。

use crate::error::{EditorError, NoteError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 88 键钢琴的行数
pub const KEY_COUNT: u8 = 88;
/// 最高行（音高 0）
pub const PITCH_MIN: u8 = 0;
/// 最低行（音高 87）
pub const PITCH_MAX: u8 = KEY_COUNT - 1;
pub const VELOCITY_MAX: u8 = 100;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

static NOTE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NoteId(pub u64);

impl NoteId {
    pub fn next() -> Self {
        NoteId(NOTE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// 一个音符的不可变描述。
///
/// 所有修改都通过 `with_*` 生成新值，校验失败时返回 [`NoteError`]。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNote")]
pub struct NoteData {
    pitch: u8,    // 行号，0 = C8，87 = A0
    start: f64,   // 网格单元（拍）
    end: f64,
    velocity: u8, // 0-100
}

impl NoteData {
    pub fn new(pitch: u8, start: f64, end: f64, velocity: u8) -> Result<Self, NoteError> {
        validate(pitch, start, end, velocity)?;
        Ok(Self {
            pitch,
            start,
            end,
            velocity,
        })
    }

    pub fn pitch(&self) -> u8 {
        self.pitch
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn with_pitch(&self, pitch: u8) -> Result<Self, NoteError> {
        Self::new(pitch, self.start, self.end, self.velocity)
    }

    pub fn with_start(&self, start: f64) -> Result<Self, NoteError> {
        Self::new(self.pitch, start, self.end, self.velocity)
    }

    pub fn with_end(&self, end: f64) -> Result<Self, NoteError> {
        Self::new(self.pitch, self.start, end, self.velocity)
    }

    pub fn with_velocity(&self, velocity: u8) -> Result<Self, NoteError> {
        Self::new(self.pitch, self.start, self.end, velocity)
    }

    /// 平移到新的起点和行，保持长度不变（拖动音符主体）。
    pub fn moved_to(&self, start: f64, pitch: u8) -> Result<Self, NoteError> {
        Self::new(pitch, start, start + self.duration(), self.velocity)
    }

    pub fn x_on_grid(&self, grid: &GridInfo) -> f64 {
        self.start * grid.cell_width()
    }

    pub fn y_on_grid(&self, grid: &GridInfo) -> f64 {
        self.pitch as f64 * grid.cell_height()
    }

    pub fn width_on_grid(&self, grid: &GridInfo) -> f64 {
        self.duration() * grid.cell_width()
    }

    pub fn height_on_grid(&self, grid: &GridInfo) -> f64 {
        grid.cell_height()
    }

    pub fn velocity_fraction(&self) -> f64 {
        self.velocity as f64 / VELOCITY_MAX as f64
    }

    pub fn name(&self) -> String {
        pitch_name(self.pitch)
    }

    /// 对应的 MIDI 音符编号（A0 = 21，C8 = 108）
    pub fn midi_key(&self) -> u8 {
        108 - self.pitch
    }

    /// 音符是否覆盖给定的拍位置（左闭右开）
    pub fn covers(&self, beat: f64) -> bool {
        beat >= self.start && beat < self.end
    }
}

/// 反序列化时先读入原始字段，再走与构造函数相同的校验
#[derive(Deserialize)]
struct RawNote {
    pitch: u8,
    start: f64,
    end: f64,
    velocity: u8,
}

impl TryFrom<RawNote> for NoteData {
    type Error = NoteError;

    fn try_from(raw: RawNote) -> Result<Self, Self::Error> {
        NoteData::new(raw.pitch, raw.start, raw.end, raw.velocity)
    }
}

fn validate(pitch: u8, start: f64, end: f64, velocity: u8) -> Result<(), NoteError> {
    if pitch > PITCH_MAX {
        return Err(NoteError::PitchOutOfRange(pitch));
    }
    if velocity > VELOCITY_MAX {
        return Err(NoteError::VelocityOutOfRange(velocity));
    }
    if !start.is_finite() || start < 0.0 {
        return Err(NoteError::InvalidStart(start));
    }
    // NaN 的比较总为 false，需要显式拒绝
    if !end.is_finite() || end <= start {
        return Err(NoteError::InvalidSpan { start, end });
    }
    Ok(())
}

/// 将行号转换为音名，例如 0 -> "C8"，48 -> "C4"，87 -> "A0"。
///
/// 超出 88 键范围的值会被钳制到最近的一端。
pub fn pitch_name(pitch: u8) -> String {
    let key = (KEY_COUNT - pitch.min(PITCH_MAX)) as usize; // 1..=88, 1 = A0
    let index = key + 8;
    format!("{}{}", NOTE_NAMES[index % 12], index / 12)
}

/// 网格单元的像素尺寸，由表现层提供。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct GridInfo {
    cell_width: f64,
    cell_height: f64,
}

#[derive(Deserialize)]
struct RawGrid {
    cell_width: f64,
    cell_height: f64,
}

impl TryFrom<RawGrid> for GridInfo {
    type Error = EditorError;

    fn try_from(raw: RawGrid) -> Result<Self, Self::Error> {
        GridInfo::new(raw.cell_width, raw.cell_height)
    }
}

impl Default for GridInfo {
    fn default() -> Self {
        Self {
            cell_width: 40.0,
            cell_height: 16.0,
        }
    }
}

impl GridInfo {
    pub fn new(cell_width: f64, cell_height: f64) -> Result<Self, EditorError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(cell_width) || !valid(cell_height) {
            return Err(EditorError::InvalidGrid {
                width: cell_width,
                height: cell_height,
            });
        }
        Ok(Self {
            cell_width,
            cell_height,
        })
    }

    pub fn cell_width(&self) -> f64 {
        self.cell_width
    }

    pub fn cell_height(&self) -> f64 {
        self.cell_height
    }

    /// 像素横坐标 -> 拍
    pub fn beat_at(&self, x: f64) -> f64 {
        x / self.cell_width
    }

    /// 像素纵坐标 -> 行号（钳制到 0..=87）
    pub fn pitch_at(&self, y: f64) -> u8 {
        let row = (y / self.cell_height).floor();
        row.clamp(PITCH_MIN as f64, PITCH_MAX as f64) as u8
    }

    /// 按 1/division 拍吸附，division 为 0 时不吸附
    pub fn snap(&self, beats: f64, division: u32) -> f64 {
        if division == 0 {
            return beats;
        }
        let step = 1.0 / division as f64;
        (beats / step).round() * step
    }

    /// 网格总高度（全部 88 行）
    pub fn total_height(&self) -> f64 {
        KEY_COUNT as f64 * self.cell_height
    }
}
