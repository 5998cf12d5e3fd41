//! # piano_roll
//!
//! 钢琴卷帘编辑器的核心：音符数据/注册表模型与循环播放传输引擎。
//!
//! ## 功能特性
//!
//! - **音符模型**：不可变的 [`NoteData`]，通过 `with_*` 生成新值并校验范围
//! - **注册表**：[`NoteRegistry`] 独占所有音符，提供增删通知与条目级变化通知
//! - **播放传输**：[`PlaybackService`] 支持播放、暂停、停止、循环区间与逐帧推进
//! - **命令层**：[`PianoRollEditor`] 接收 [`EditorCommand`] 并产生 [`EditorEvent`]
//!
//! ## 基本使用
//!
//! ```rust
//! use piano_roll::{EditorCommand, NoteData, PianoRollEditor};
//!
//! let mut editor = PianoRollEditor::new();
//! let id = editor.add_note(NoteData::new(48, 0.0, 1.0, 80)?);
//! editor.apply_command(EditorCommand::SetVelocity { id, velocity: 100 })?;
//! editor.apply_command(EditorCommand::Play)?;
//!
//! // 在宿主的动画循环中每帧调用
//! editor.tick(0.0);
//! editor.tick(0.5);
//! assert_eq!(editor.playback().state().value(), 1.0);
//! # Ok::<(), piano_roll::EditorError>(())
//! ```
//!
//! 所有状态只在一个线程上修改；其他线程可以通过
//! [`PianoRollEditor::command_sender`] 排队命令。

pub mod editor;
pub mod error;
pub mod playback;
pub mod registry;
pub mod structure;

pub use editor::{EditorCommand, EditorEvent, EditorOptions, PianoRollEditor};
pub use error::{EditorError, NoteError};
pub use playback::{FrameClock, PlaybackService, PlaybackState};
pub use registry::{NoteEntry, NoteRegistry};
pub use structure::{pitch_name, GridInfo, NoteData, NoteId};
