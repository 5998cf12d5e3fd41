//! 编辑命令和事件模块
//!
//! 表现层把原始输入翻译为 [`EditorCommand`] 交给 [`PianoRollEditor`]，
//! 并通过 [`EditorEvent`] 监听模型变化，核心不包含任何 UI 事件词汇。

use crate::error::{EditorError, NoteError};
use crate::playback::{PlaybackService, PlaybackState};
use crate::registry::{NoteEntry, NoteRegistry};
use crate::structure::{GridInfo, NoteData, NoteId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// 宿主可推送到编辑器的命令
#[derive(Clone, Debug, PartialEq)]
pub enum EditorCommand {
    AddNote(NoteData),
    RemoveNote(NoteId),
    MoveNote {
        id: NoteId,
        start: f64,
        pitch: u8,
    },
    ResizeNote {
        id: NoteId,
        start: f64,
        end: f64,
    },
    SetVelocity {
        id: NoteId,
        velocity: u8,
    },
    ClearNotes,
    Play,
    Pause,
    Stop,
    TogglePlayback,
    SetHead(f64),
    SetTail(f64),
    SetTempo(u32),
    Seek(f64),
    SetGrid(GridInfo),
}

/// 外部宿主可监听的编辑事件
#[derive(Clone, Debug, PartialEq)]
pub enum EditorEvent {
    NoteAdded {
        id: NoteId,
        data: NoteData,
    },
    NoteRemoved {
        id: NoteId,
        data: NoteData,
    },
    NoteUpdated {
        id: NoteId,
        before: NoteData,
        after: NoteData,
    },
    PlaybackChanged {
        before: PlaybackState,
        after: PlaybackState,
    },
    GridChanged(GridInfo),
}

/// 初始化配置，可由宿主从任意 serde 格式加载，缺省字段使用默认值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorOptions {
    pub cell_width: f64,
    pub cell_height: f64,
    pub tempo: u32,
    pub loop_head: f64,
    pub loop_tail: f64,
    /// 每拍吸附份数，0 表示不吸附
    pub snap_division: u32,
}

impl Default for EditorOptions {
    fn default() -> Self {
        let grid = GridInfo::default();
        let transport = PlaybackState::default();
        Self {
            cell_width: grid.cell_width(),
            cell_height: grid.cell_height(),
            tempo: transport.tempo(),
            loop_head: transport.head(),
            loop_tail: transport.tail(),
            snap_division: 4,
        }
    }
}

impl EditorOptions {
    pub fn validate(&self) -> Result<(GridInfo, PlaybackState), EditorError> {
        let grid = GridInfo::new(self.cell_width, self.cell_height)?;
        let transport = PlaybackState::new(self.loop_head, self.loop_tail, self.tempo)?;
        Ok((grid, transport))
    }
}

#[derive(Default)]
struct EventSink {
    pending: Vec<EditorEvent>,
    listener: Option<Box<dyn FnMut(&EditorEvent)>>,
}

impl EventSink {
    /// 装有监听器时事件直接交给监听器，否则进入待取队列
    fn emit(&mut self, event: EditorEvent) {
        match &mut self.listener {
            Some(listener) => listener(&event),
            None => self.pending.push(event),
        }
    }
}

/// 一个编辑会话：独占音符注册表和播放服务，并提供命令入口。
pub struct PianoRollEditor {
    notes: NoteRegistry,
    playback: PlaybackService,
    grid: GridInfo,
    snap_division: u32,
    sink: Rc<RefCell<EventSink>>,
    command_tx: Sender<EditorCommand>,
    command_rx: Receiver<EditorCommand>,
}

impl Default for PianoRollEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl PianoRollEditor {
    pub fn new() -> Self {
        let options = EditorOptions::default();
        Self::from_parts(GridInfo::default(), PlaybackState::default(), options.snap_division)
    }

    pub fn with_options(options: &EditorOptions) -> Result<Self, EditorError> {
        let (grid, transport) = options.validate()?;
        Ok(Self::from_parts(grid, transport, options.snap_division))
    }

    fn from_parts(grid: GridInfo, transport: PlaybackState, snap_division: u32) -> Self {
        let sink = Rc::new(RefCell::new(EventSink::default()));

        let mut notes = NoteRegistry::new();
        let added = sink.clone();
        notes.on_added(move |entry| {
            added.borrow_mut().emit(EditorEvent::NoteAdded {
                id: entry.id(),
                data: entry.get(),
            });
        });
        let removed = sink.clone();
        notes.on_removed(move |entry| {
            removed.borrow_mut().emit(EditorEvent::NoteRemoved {
                id: entry.id(),
                data: entry.get(),
            });
        });

        let mut playback = PlaybackService::new(transport);
        let changed = sink.clone();
        playback.observe(move |before, after| {
            changed.borrow_mut().emit(EditorEvent::PlaybackChanged {
                before: *before,
                after: *after,
            });
        });

        let (command_tx, command_rx) = unbounded();
        Self {
            notes,
            playback,
            grid,
            snap_division,
            sink,
            command_tx,
            command_rx,
        }
    }

    /// 安装监听器后事件不再排队；已排队但未取走的事件会先交给新监听器。
    pub fn set_event_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&EditorEvent) + 'static,
    {
        let mut listener: Box<dyn FnMut(&EditorEvent)> = Box::new(listener);
        let mut sink = self.sink.borrow_mut();
        for event in std::mem::take(&mut sink.pending) {
            listener(&event);
        }
        sink.listener = Some(listener);
    }

    /// 取走排队的事件。未安装监听器的宿主需要每帧调用，播放时每帧都会产生事件。
    pub fn take_events(&mut self) -> Vec<EditorEvent> {
        std::mem::take(&mut self.sink.borrow_mut().pending)
    }

    pub fn notes(&self) -> &NoteRegistry {
        &self.notes
    }

    /// 修改已存在的音符。新音符必须经 [`Self::add_note`] 创建，才能产生 `NoteUpdated` 事件。
    pub fn note_mut(&mut self, id: NoteId) -> Option<&mut NoteEntry> {
        self.notes.get_mut(id)
    }

    pub fn playback(&self) -> &PlaybackService {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackService {
        &mut self.playback
    }

    pub fn grid(&self) -> GridInfo {
        self.grid
    }

    pub fn snap_division(&self) -> u32 {
        self.snap_division
    }

    /// 按当前吸附设置对齐拍位置
    pub fn snap(&self, beats: f64) -> f64 {
        self.grid.snap(beats, self.snap_division)
    }

    pub fn add_note(&mut self, data: NoteData) -> NoteId {
        let id = self.notes.register(data);
        if let Some(entry) = self.notes.get_mut(id) {
            let updated = self.sink.clone();
            entry.subscribe(move |before, after| {
                updated.borrow_mut().emit(EditorEvent::NoteUpdated {
                    id,
                    before: *before,
                    after: *after,
                });
            });
        }
        id
    }

    pub fn remove_note(&mut self, id: NoteId) -> Option<NoteData> {
        self.notes.unregister(id)
    }

    /// 通过注册表修改音符。失败时音符保持原值。
    pub fn modify_note<F>(&mut self, id: NoteId, transform: F) -> Result<bool, EditorError>
    where
        F: FnOnce(&NoteData) -> Result<NoteData, NoteError>,
    {
        Ok(self.notes.modify(id, transform)?)
    }

    pub fn apply_command(&mut self, command: EditorCommand) -> Result<(), EditorError> {
        match command {
            EditorCommand::AddNote(data) => {
                self.add_note(data);
            }
            EditorCommand::RemoveNote(id) => {
                self.remove_note(id);
            }
            EditorCommand::MoveNote { id, start, pitch } => {
                self.modify_note(id, |n| n.moved_to(start, pitch))?;
            }
            EditorCommand::ResizeNote { id, start, end } => {
                self.modify_note(id, |n| NoteData::new(n.pitch(), start, end, n.velocity()))?;
            }
            EditorCommand::SetVelocity { id, velocity } => {
                self.modify_note(id, |n| n.with_velocity(velocity))?;
            }
            EditorCommand::ClearNotes => self.notes.clear(),
            EditorCommand::Play => self.playback.play(),
            EditorCommand::Pause => self.playback.pause(),
            EditorCommand::Stop => self.playback.stop(),
            EditorCommand::TogglePlayback => self.playback.toggle(),
            EditorCommand::SetHead(head) => self.playback.set_head(head),
            EditorCommand::SetTail(tail) => self.playback.set_tail(tail),
            EditorCommand::SetTempo(bpm) => self.playback.set_tempo(bpm),
            EditorCommand::Seek(value) => self.playback.seek(value),
            EditorCommand::SetGrid(grid) => {
                if grid != self.grid {
                    self.grid = grid;
                    self.sink.borrow_mut().emit(EditorEvent::GridChanged(grid));
                }
            }
        }
        Ok(())
    }

    /// 可跨线程投递命令的发送端，命令在 [`Self::process_commands`] 中按 FIFO 执行
    pub fn command_sender(&self) -> Sender<EditorCommand> {
        self.command_tx.clone()
    }

    pub fn process_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.command_rx.try_recv() {
            match self.apply_command(command.clone()) {
                Ok(()) => applied += 1,
                Err(err) => log::warn!("rejected {:?}: {}", command, err),
            }
        }
        applied
    }

    /// 动画循环每帧调用：先处理排队命令，再推进播放
    pub fn tick(&mut self, now_seconds: f64) {
        self.process_commands();
        self.playback.tick(now_seconds);
    }
}

impl fmt::Debug for PianoRollEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PianoRollEditor")
            .field("notes", &self.notes)
            .field("playback", &self.playback)
            .field("grid", &self.grid)
            .field("snap_division", &self.snap_division)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        let (grid, transport) = EditorOptions::default().validate().unwrap();
        assert_eq!(grid, GridInfo::default());
        assert_eq!(transport, PlaybackState::default());
    }

    #[test]
    fn options_fill_missing_fields_from_defaults() {
        let options: EditorOptions = serde_json::from_str(r#"{ "tempo": 90, "loop_tail": 8.0 }"#).unwrap();
        assert_eq!(options.tempo, 90);
        assert_eq!(options.loop_tail, 8.0);
        assert_eq!(options.cell_width, EditorOptions::default().cell_width);
        assert_eq!(options.snap_division, 4);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let zero_tempo = EditorOptions {
            tempo: 0,
            ..EditorOptions::default()
        };
        assert!(matches!(zero_tempo.validate(), Err(EditorError::InvalidTransport(_))));

        let flat_grid = EditorOptions {
            cell_height: 0.0,
            ..EditorOptions::default()
        };
        assert!(matches!(
            PianoRollEditor::with_options(&flat_grid),
            Err(EditorError::InvalidGrid { .. })
        ));
    }

    #[test]
    fn set_grid_emits_only_on_change() {
        let mut editor = PianoRollEditor::new();
        editor.apply_command(EditorCommand::SetGrid(GridInfo::default())).unwrap();
        assert!(editor.take_events().is_empty());

        let grid = GridInfo::new(30.0, 12.0).unwrap();
        editor.apply_command(EditorCommand::SetGrid(grid)).unwrap();
        assert_eq!(editor.take_events(), vec![EditorEvent::GridChanged(grid)]);
        assert_eq!(editor.grid(), grid);
    }

    #[test]
    fn snap_uses_configured_division() {
        let editor = PianoRollEditor::new();
        assert_eq!(editor.snap(2.1), 2.0);
        assert_eq!(editor.snap(2.2), 2.25);
    }
}
