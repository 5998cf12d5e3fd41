use eframe::egui::{self, Align2, Color32, FontId, Pos2, Rect, Sense, Stroke, TopBottomPanel, Vec2};
use piano_roll::structure::KEY_COUNT;
use piano_roll::{
    pitch_name, EditorCommand, EditorEvent, EditorOptions, GridInfo, NoteData, NoteId,
    PianoRollEditor,
};

const KEYBOARD_WIDTH: f32 = 44.0;
const RULER_HEIGHT: f32 = 22.0;
const VELOCITY_LANE_HEIGHT: f32 = 90.0;
const HANDLE_WIDTH: f32 = 6.0;
const VISIBLE_BEATS: f64 = 32.0;

fn main() -> eframe::Result<()> {
    env_logger::init();

    let native_options = eframe::NativeOptions::default();
    eframe::run_native(
        "Piano Roll Example",
        native_options,
        Box::new(|_cc| Ok(Box::new(PianoRollApp::new()))),
    )
}

#[derive(Clone, Copy, Debug)]
enum DragMode {
    Move { grab_offset: f64 },
    ResizeStart,
    ResizeEnd,
    Velocity,
    Head,
    Tail,
}

#[derive(Clone, Copy, Debug)]
struct DragState {
    note: Option<NoteId>,
    mode: DragMode,
}

/// 画布上各区域的位置，用于像素与网格坐标之间的换算
struct Layout {
    origin: Pos2,
    grid: GridInfo,
}

impl Layout {
    fn ruler_rect(&self) -> Rect {
        Rect::from_min_size(
            self.origin + Vec2::new(KEYBOARD_WIDTH, 0.0),
            Vec2::new(self.content_width(), RULER_HEIGHT),
        )
    }

    fn grid_rect(&self) -> Rect {
        Rect::from_min_size(
            self.origin + Vec2::new(KEYBOARD_WIDTH, RULER_HEIGHT),
            Vec2::new(self.content_width(), self.grid.total_height() as f32),
        )
    }

    fn lane_rect(&self) -> Rect {
        let grid = self.grid_rect();
        Rect::from_min_size(
            Pos2::new(grid.min.x, grid.max.y),
            Vec2::new(grid.width(), VELOCITY_LANE_HEIGHT),
        )
    }

    fn content_width(&self) -> f32 {
        (VISIBLE_BEATS * self.grid.cell_width()) as f32
    }

    fn total_size(&self) -> Vec2 {
        Vec2::new(
            KEYBOARD_WIDTH + self.content_width(),
            RULER_HEIGHT + self.grid.total_height() as f32 + VELOCITY_LANE_HEIGHT,
        )
    }

    fn beat_at(&self, pos: Pos2) -> f64 {
        self.grid.beat_at((pos.x - self.grid_rect().min.x) as f64)
    }

    fn pitch_at(&self, pos: Pos2) -> u8 {
        self.grid.pitch_at((pos.y - self.grid_rect().min.y) as f64)
    }

    fn x_of(&self, beat: f64) -> f32 {
        self.grid_rect().min.x + (beat * self.grid.cell_width()) as f32
    }

    fn note_rect(&self, note: &NoteData) -> Rect {
        let grid = self.grid_rect();
        Rect::from_min_size(
            Pos2::new(
                grid.min.x + note.x_on_grid(&self.grid) as f32,
                grid.min.y + note.y_on_grid(&self.grid) as f32,
            ),
            Vec2::new(
                note.width_on_grid(&self.grid) as f32,
                note.height_on_grid(&self.grid) as f32,
            ),
        )
    }
}

struct PianoRollApp {
    editor: PianoRollEditor,
    drag: Option<DragState>,
    status_line: String,
}

impl PianoRollApp {
    fn new() -> Self {
        let options = EditorOptions {
            tempo: 100,
            loop_tail: 8.0,
            ..EditorOptions::default()
        };
        let mut editor = PianoRollEditor::with_options(&options).unwrap_or_default();

        // C major arpeggio: C4 E4 G4 C5
        for (pitch, start, end) in [(48, 0.0, 1.0), (44, 1.0, 2.0), (41, 2.0, 3.0), (36, 3.0, 7.0)] {
            if let Ok(note) = NoteData::new(pitch, start, end, 80) {
                editor.add_note(note);
            }
        }
        editor.take_events();

        Self {
            editor,
            drag: None,
            status_line: "Ready".to_owned(),
        }
    }

    fn dispatch(&mut self, command: EditorCommand) {
        if let Err(err) = self.editor.apply_command(command) {
            // 拖动中产生的非法值直接丢弃，音符保持上一个合法状态
            log::debug!("command rejected: {err}");
            self.status_line = format!("Rejected: {err}");
        }
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        let state = self.editor.playback().state();
        ui.horizontal(|ui| {
            let label = if state.is_playing() { "Pause" } else { "Play" };
            if ui.button(label).clicked() {
                self.dispatch(EditorCommand::TogglePlayback);
            }
            if ui.button("Stop").clicked() {
                self.dispatch(EditorCommand::Stop);
            }
            ui.separator();

            let mut tempo = state.tempo();
            if ui
                .add(egui::DragValue::new(&mut tempo).range(20..=400).suffix(" BPM"))
                .changed()
            {
                self.dispatch(EditorCommand::SetTempo(tempo));
            }
            ui.separator();
            ui.label(format!(
                "Position {:.2}  Loop {:.2} - {:.2}",
                state.value(),
                state.head(),
                state.tail()
            ));
            ui.label(format!("Notes: {}", self.editor.notes().len()));
        });
    }

    fn piano_roll(&mut self, ui: &mut egui::Ui) {
        let grid = self.editor.grid();
        let size = Layout {
            origin: Pos2::ZERO,
            grid,
        }
        .total_size();
        let (response, painter) = ui.allocate_painter(size, Sense::click_and_drag());
        let layout = Layout {
            origin: response.rect.min,
            grid,
        };

        self.handle_pointer(&response, &layout, ui);
        self.paint(&painter, &layout);
    }

    fn handle_pointer(&mut self, response: &egui::Response, layout: &Layout, ui: &egui::Ui) {
        if response.drag_started() {
            if let Some(origin) = ui.input(|i| i.pointer.press_origin()) {
                self.drag = self.begin_drag(origin, layout);
            }
        }

        if response.dragged() {
            if let (Some(drag), Some(pos)) = (self.drag, response.interact_pointer_pos()) {
                self.continue_drag(drag, pos, layout);
            }
        }

        if response.drag_stopped() {
            self.drag = None;
        }

        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.click(pos, layout);
            }
        }

        if response.secondary_clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                if layout.grid_rect().contains(pos) {
                    if let Some(id) = self.editor.notes().note_at(layout.beat_at(pos), layout.pitch_at(pos)) {
                        self.dispatch(EditorCommand::RemoveNote(id));
                    }
                }
            }
        }
    }

    fn begin_drag(&self, origin: Pos2, layout: &Layout) -> Option<DragState> {
        let beat = layout.beat_at(origin);
        if layout.ruler_rect().contains(origin) {
            let state = self.editor.playback().state();
            let near = |b: f64| (layout.x_of(b) - origin.x).abs() <= HANDLE_WIDTH;
            let mode = if near(state.head()) {
                DragMode::Head
            } else if near(state.tail()) {
                DragMode::Tail
            } else {
                return None;
            };
            return Some(DragState { note: None, mode });
        }

        if layout.lane_rect().contains(origin) {
            let id = self
                .editor
                .notes()
                .entries()
                .filter(|e| e.get().covers(beat))
                .last()
                .map(|e| e.id())?;
            return Some(DragState {
                note: Some(id),
                mode: DragMode::Velocity,
            });
        }

        let id = self.editor.notes().note_at(beat, layout.pitch_at(origin))?;
        let note = self.editor.notes().get(id)?.get();
        let rect = layout.note_rect(&note);
        let mode = if origin.x - rect.min.x <= HANDLE_WIDTH {
            DragMode::ResizeStart
        } else if rect.max.x - origin.x <= HANDLE_WIDTH {
            DragMode::ResizeEnd
        } else {
            DragMode::Move {
                grab_offset: beat - note.start(),
            }
        };
        Some(DragState { note: Some(id), mode })
    }

    fn continue_drag(&mut self, drag: DragState, pos: Pos2, layout: &Layout) {
        let beat = layout.beat_at(pos);
        let current = drag
            .note
            .and_then(|id| self.editor.notes().get(id))
            .map(|entry| (entry.id(), entry.get()));

        let command = match (drag.mode, current) {
            (DragMode::Head, _) => EditorCommand::SetHead(self.editor.snap(beat).max(0.0)),
            (DragMode::Tail, _) => EditorCommand::SetTail(self.editor.snap(beat).max(0.0)),
            (DragMode::Move { grab_offset }, Some((id, _))) => EditorCommand::MoveNote {
                id,
                start: self.editor.snap(beat - grab_offset).max(0.0),
                pitch: layout.pitch_at(pos),
            },
            (DragMode::ResizeStart, Some((id, note))) => EditorCommand::ResizeNote {
                id,
                start: self.editor.snap(beat),
                end: note.end(),
            },
            (DragMode::ResizeEnd, Some((id, note))) => EditorCommand::ResizeNote {
                id,
                start: note.start(),
                end: self.editor.snap(beat),
            },
            (DragMode::Velocity, Some((id, _))) => {
                let lane = layout.lane_rect();
                let fraction = (1.0 - (pos.y - lane.min.y) / lane.height()).clamp(0.0, 1.0);
                EditorCommand::SetVelocity {
                    id,
                    velocity: (fraction * 100.0).round() as u8,
                }
            }
            // 音符在拖动过程中被删除
            (_, None) => {
                self.drag = None;
                return;
            }
        };
        self.dispatch(command);
    }

    fn click(&mut self, pos: Pos2, layout: &Layout) {
        let beat = layout.beat_at(pos);
        if layout.ruler_rect().contains(pos) {
            self.dispatch(EditorCommand::Seek(beat.max(0.0)));
        } else if layout.grid_rect().contains(pos) {
            let pitch = layout.pitch_at(pos);
            if self.editor.notes().note_at(beat, pitch).is_some() {
                return;
            }
            let start = (beat - 0.5 * (1.0 / self.editor.snap_division().max(1) as f64)).max(0.0);
            let start = self.editor.snap(start);
            match NoteData::new(pitch, start, start + 1.0, 80) {
                Ok(note) => self.dispatch(EditorCommand::AddNote(note)),
                Err(err) => self.status_line = format!("Rejected: {err}"),
            }
        }
    }

    fn paint(&self, painter: &egui::Painter, layout: &Layout) {
        let grid = layout.grid_rect();
        let cell_height = layout.grid.cell_height() as f32;

        for pitch in 0..KEY_COUNT {
            let name = pitch_name(pitch);
            let y = grid.min.y + pitch as f32 * cell_height;
            let row = Rect::from_min_size(Pos2::new(grid.min.x, y), Vec2::new(grid.width(), cell_height));
            let fill = if name.contains('#') {
                Color32::from_gray(32)
            } else {
                Color32::from_gray(44)
            };
            painter.rect_filled(row, 0.0, fill);

            let key = Rect::from_min_size(
                Pos2::new(layout.origin.x, y),
                Vec2::new(KEYBOARD_WIDTH, cell_height),
            );
            let key_fill = if name.contains('#') {
                Color32::from_gray(20)
            } else {
                Color32::from_gray(220)
            };
            painter.rect_filled(key, 0.0, key_fill);
            if name.starts_with('C') && !name.contains('#') {
                painter.text(
                    key.left_center() + Vec2::new(4.0, 0.0),
                    Align2::LEFT_CENTER,
                    name,
                    FontId::proportional(10.0),
                    Color32::BLACK,
                );
            }
        }

        for beat in 0..=VISIBLE_BEATS as u32 {
            let x = layout.x_of(beat as f64);
            let color = if beat % 4 == 0 {
                Color32::from_gray(90)
            } else {
                Color32::from_gray(60)
            };
            painter.line_segment(
                [Pos2::new(x, grid.min.y), Pos2::new(x, layout.lane_rect().max.y)],
                Stroke::new(1.0, color),
            );
        }

        let state = self.editor.playback().state();
        let ruler = layout.ruler_rect();
        painter.rect_filled(ruler, 0.0, Color32::from_gray(28));
        let loop_rect = Rect::from_x_y_ranges(layout.x_of(state.head())..=layout.x_of(state.tail()), ruler.y_range());
        painter.rect_filled(loop_rect, 0.0, Color32::from_rgba_unmultiplied(0, 160, 200, 60));
        for marker in [state.head(), state.tail()] {
            let x = layout.x_of(marker);
            painter.line_segment([Pos2::new(x, ruler.min.y), Pos2::new(x, ruler.max.y)], Stroke::new(2.0, Color32::LIGHT_BLUE));
        }

        let lane = layout.lane_rect();
        painter.rect_filled(lane, 0.0, Color32::from_gray(24));

        for entry in self.editor.notes().entries() {
            let note = entry.get();
            let rect = layout.note_rect(&note);
            let shade = 90 + (note.velocity_fraction() * 120.0) as u8;
            painter.rect_filled(rect, 3.0, Color32::from_rgb(30, shade, 60));
            painter.rect_stroke(rect, 3.0, Stroke::new(1.0, Color32::BLACK));
            painter.text(
                rect.left_center() + Vec2::new(3.0, 0.0),
                Align2::LEFT_CENTER,
                note.name(),
                FontId::proportional(9.0),
                Color32::WHITE,
            );

            let bar_height = note.velocity_fraction() as f32 * lane.height();
            let bar = Rect::from_min_max(
                Pos2::new(rect.min.x, lane.max.y - bar_height),
                Pos2::new(rect.min.x + layout.grid.cell_width() as f32 * 0.5, lane.max.y),
            );
            painter.rect_filled(bar, 2.0, Color32::from_rgb(30, shade, 60));
        }

        let x = layout.x_of(state.value());
        painter.line_segment(
            [Pos2::new(x, ruler.min.y), Pos2::new(x, lane.max.y)],
            Stroke::new(2.0, Color32::from_rgba_unmultiplied(0, 255, 255, 160)),
        );
    }
}

impl eframe::App for PianoRollApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // 先推进播放再处理输入，本帧的命令从下一帧开始计时
        let now = ctx.input(|i| i.time);
        self.editor.tick(now);

        if ctx.input(|i| i.key_pressed(egui::Key::Space)) {
            self.dispatch(EditorCommand::TogglePlayback);
        }

        TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.toolbar(ui);
        });

        TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.label(self.status_line.clone());
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::both().show(ui, |ui| {
                self.piano_roll(ui);
            });
        });

        if self.editor.playback().state().is_playing() {
            ctx.request_repaint();
        }

        for event in self.editor.take_events() {
            match event {
                EditorEvent::PlaybackChanged { .. } => log::trace!("[EditorEvent] {:?}", event),
                _ => log::info!("[EditorEvent] {:?}", event),
            }
        }
    }
}
