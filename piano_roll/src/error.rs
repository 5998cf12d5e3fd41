//! 错误类型
//!
//! 核心只有局部错误：校验失败和由调用方提供的变换失败。
//! 删除不存在的音符等情况不是错误，而是无操作。

use thiserror::Error;

/// 构造或替换 [`NoteData`](crate::structure::NoteData) 时的校验失败。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NoteError {
    #[error("pitch {0} is outside the 88-key range 0..=87")]
    PitchOutOfRange(u8),

    #[error("velocity {0} is outside 0..=100")]
    VelocityOutOfRange(u8),

    #[error("note start {0} must be a finite value >= 0")]
    InvalidStart(f64),

    #[error("note end {end} must be greater than start {start}")]
    InvalidSpan { start: f64, end: f64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditorError {
    #[error(transparent)]
    Note(#[from] NoteError),

    #[error("grid cells must be positive, got {width}x{height}")]
    InvalidGrid { width: f64, height: f64 },

    #[error("invalid transport configuration: {0}")]
    InvalidTransport(String),
}
