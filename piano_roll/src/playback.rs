//! 播放传输模块
//!
//! [`PlaybackService`] 持有唯一的 [`PlaybackState`]，每次转换整体替换状态，
//! 并在同一线程上同步通知观察者。表现层的动画循环每帧调用一次 [`PlaybackService::tick`]。

use crate::error::EditorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const TEMPO_MIN: u32 = 20;
pub const TEMPO_MAX: u32 = 400;

/// 传输参数的不可变快照，位置单位为拍。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    head: f64,  // 循环起点
    tail: f64,  // 循环终点
    value: f64, // 当前播放位置
    tempo: u32, // BPM
    playing: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            head: 0.0,
            tail: 16.0,
            value: 0.0,
            tempo: 120,
            playing: false,
        }
    }
}

impl PlaybackState {
    /// 校验配置并创建停止状态，播放位置位于 head。
    pub fn new(head: f64, tail: f64, tempo: u32) -> Result<Self, EditorError> {
        if tempo == 0 {
            return Err(EditorError::InvalidTransport("tempo must be > 0".into()));
        }
        if !head.is_finite() || !tail.is_finite() || tail < head {
            return Err(EditorError::InvalidTransport(format!(
                "loop [{head}, {tail}] must be finite with tail >= head"
            )));
        }
        Ok(Self {
            head,
            tail,
            value: head,
            tempo,
            playing: false,
        })
    }

    pub fn head(&self) -> f64 {
        self.head
    }

    pub fn tail(&self) -> f64 {
        self.tail
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn with_head(self, head: f64) -> Self {
        Self { head, ..self }
    }

    pub fn with_tail(self, tail: f64) -> Self {
        Self { tail, ..self }
    }

    pub fn with_value(self, value: f64) -> Self {
        Self { value, ..self }
    }

    pub fn with_tempo(self, tempo: u32) -> Self {
        Self { tempo, ..self }
    }

    pub fn with_playing(self, playing: bool) -> Self {
        Self { playing, ..self }
    }

    /// 播放位置在循环区间中的进度 (0.0-1.0)
    pub fn progress(&self) -> f64 {
        let span = self.tail - self.head;
        if span > 0.0 {
            ((self.value - self.head) / span).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// 将绝对帧时间转换为帧间隔。第一帧没有上一时间戳，视为零间隔。
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameClock {
    last: Option<f64>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, now_seconds: f64) -> Duration {
        let delta = match self.last {
            Some(last) => now_seconds - last,
            None => 0.0,
        };
        self.last = Some(now_seconds);
        if delta.is_finite() && delta > 0.0 {
            Duration::from_secs_f64(delta)
        } else {
            Duration::ZERO
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

pub type PlaybackObserver = Box<dyn FnMut(&PlaybackState, &PlaybackState)>;

pub struct PlaybackService {
    state: PlaybackState,
    observers: Vec<PlaybackObserver>,
    clock: FrameClock,
}

impl Default for PlaybackService {
    fn default() -> Self {
        Self::new(PlaybackState::default())
    }
}

impl PlaybackService {
    pub fn new(state: PlaybackState) -> Self {
        Self {
            state,
            observers: Vec::new(),
            clock: FrameClock::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// 开始播放。帧时钟同时复位，下一帧作为预热，停止期间的空闲时间不计入。
    pub fn play(&mut self) {
        if !self.state.playing {
            self.clock.reset();
        }
        self.replace(self.state.with_playing(true));
    }

    pub fn pause(&mut self) {
        self.replace(self.state.with_playing(false));
    }

    /// 停止并把播放位置复位到当前 head。
    pub fn stop(&mut self) {
        let state = self.state;
        self.replace(state.with_playing(false).with_value(state.head));
    }

    pub fn toggle(&mut self) {
        if self.state.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// 移动循环起点，同时把播放位置跳到新起点（一次替换，一次通知）。
    pub fn set_head(&mut self, head: f64) {
        self.replace(self.state.with_head(head).with_value(head));
    }

    pub fn set_tail(&mut self, tail: f64) {
        self.replace(self.state.with_tail(tail));
    }

    pub fn set_tempo(&mut self, bpm: u32) {
        self.replace(self.state.with_tempo(bpm.clamp(TEMPO_MIN, TEMPO_MAX)));
    }

    pub fn seek(&mut self, value: f64) {
        self.replace(self.state.with_value(value));
    }

    /// 按经过的时间推进播放位置。越过 tail 时回到 head，丢弃超出部分。
    pub fn advance(&mut self, delta: Duration) {
        let state = self.state;
        if !state.playing {
            return;
        }
        let delta_ms = delta.as_secs_f64() * 1000.0;
        let delta_beats = delta_ms * state.tempo as f64 / 60_000.0;
        let mut value = state.value + delta_beats;
        if value > state.tail {
            log::trace!("loop wrap at {value:.3} > {:.3}, back to {:.3}", state.tail, state.head);
            value = state.head;
        }
        self.replace(state.with_value(value));
    }

    /// 每帧调用一次，`now_seconds` 为单调递增的帧时间。
    pub fn tick(&mut self, now_seconds: f64) {
        let delta = self.clock.tick(now_seconds);
        self.advance(delta);
    }

    pub fn observe<F>(&mut self, observer: F)
    where
        F: FnMut(&PlaybackState, &PlaybackState) + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    fn replace(&mut self, next: PlaybackState) -> bool {
        if next == self.state {
            return false;
        }
        let old = std::mem::replace(&mut self.state, next);
        if old.playing != next.playing {
            log::debug!(
                "transport {} at {:.3}",
                if next.playing { "playing" } else { "paused" },
                next.value
            );
        }
        for observer in &mut self.observers {
            observer(&old, &self.state);
        }
        true
    }
}

impl fmt::Debug for PlaybackService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackService")
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .field("clock", &self.clock)
            .finish()
    }
}
