//! Simon-Says: memorize a growing sequence of gestures, then repeat it.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{ConsumerKind, GestureConsumer, LiveLink};
use crate::{
    error::ConsumerError,
    types::{GestureLabel, GestureSignal},
};

/// Gestures a sequence is drawn from. Nothing else counts as input.
pub const SIMON_ALPHABET: [GestureLabel; 5] = [
    GestureLabel::ClosedFist,
    GestureLabel::OpenPalm,
    GestureLabel::Victory,
    GestureLabel::ThumbUp,
    GestureLabel::ThumbDown,
];

/// Sequence length is the level plus this.
const BASE_LENGTH: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimonTuning {
    /// Minimum confidence (0-100) for a gesture to count.
    pub min_confidence: u8,
    pub reveal: Duration,
    pub gap: Duration,
    pub countdown_from: u8,
    pub countdown_step: Duration,
    /// Inputs are ignored for this long after a correct one.
    pub input_cooldown: Duration,
    /// Pause between a completed sequence and the next one.
    pub advance_delay: Duration,
    pub allow_adjacent_repeats: bool,
}

impl Default for SimonTuning {
    fn default() -> Self {
        Self {
            min_confidence: 75,
            reveal: Duration::from_millis(1_500),
            gap: Duration::from_millis(500),
            countdown_from: 3,
            countdown_step: Duration::from_secs(1),
            input_cooldown: Duration::from_millis(800),
            advance_delay: Duration::from_millis(2_500),
            allow_adjacent_repeats: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimonState {
    Waiting,
    /// Element `index` is on screen while `revealed`, then blanked for the gap.
    Showing {
        index: usize,
        revealed: bool,
        until: Instant,
    },
    Countdown {
        remaining: u8,
        next_at: Instant,
    },
    Playing {
        cooldown_until: Option<Instant>,
    },
    Success {
        advance_at: Instant,
    },
    Failure {
        expected: GestureLabel,
        got: GestureLabel,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimonStats {
    pub level: u32,
    pub best_level: u32,
    pub streak: u32,
    pub best_streak: u32,
}

impl Default for SimonStats {
    fn default() -> Self {
        Self {
            level: 1,
            best_level: 1,
            streak: 0,
            best_streak: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputVerdict {
    /// `matched` elements of the sequence are done.
    Correct { matched: usize },
    Completed,
    Wrong {
        expected: GestureLabel,
        got: GestureLabel,
    },
}

pub struct SimonGame<R = StdRng> {
    rng: R,
    tuning: SimonTuning,
    state: SimonState,
    stats: SimonStats,
    sequence: Vec<GestureLabel>,
    progress: usize,
    last_accepted: Option<GestureLabel>,
}

impl SimonGame<StdRng> {
    pub fn new(tuning: SimonTuning) -> Self {
        Self::with_rng(StdRng::from_entropy(), tuning)
    }
}

impl<R: Rng> SimonGame<R> {
    pub fn with_rng(rng: R, tuning: SimonTuning) -> Self {
        Self {
            rng,
            tuning,
            state: SimonState::Waiting,
            stats: SimonStats::default(),
            sequence: Vec::new(),
            progress: 0,
            last_accepted: None,
        }
    }

    pub fn state(&self) -> SimonState {
        self.state
    }

    pub fn stats(&self) -> SimonStats {
        self.stats
    }

    pub fn sequence(&self) -> &[GestureLabel] {
        &self.sequence
    }

    /// Elements of the current sequence already repeated correctly.
    pub fn progress(&self) -> usize {
        self.progress
    }

    /// The element on screen during the reveal phase.
    pub fn highlighted(&self) -> Option<GestureLabel> {
        match self.state {
            SimonState::Showing {
                index,
                revealed: true,
                ..
            } => self.sequence.get(index).copied(),
            _ => None,
        }
    }

    /// Starts a round at the current level from `Waiting` or after a
    /// failure. Returns false while a round is in progress.
    pub fn start(&mut self, now: Instant) -> bool {
        match self.state {
            SimonState::Waiting | SimonState::Failure { .. } => {
                let sequence = self.generate_sequence();
                self.begin_round_with(sequence, now)
            }
            _ => false,
        }
    }

    /// Plays `sequence` from the reveal phase. Empty sequences are refused.
    pub fn begin_round_with(&mut self, sequence: Vec<GestureLabel>, now: Instant) -> bool {
        if sequence.is_empty() {
            log::warn!("refusing to start simon-says with an empty sequence");
            return false;
        }
        log::debug!("simon-says sequence: {:?}", sequence);
        self.sequence = sequence;
        self.progress = 0;
        self.last_accepted = None;
        self.state = SimonState::Showing {
            index: 0,
            revealed: true,
            until: now + self.tuning.reveal,
        };
        true
    }

    pub fn generate_sequence(&mut self) -> Vec<GestureLabel> {
        let len = self.stats.level as usize + BASE_LENGTH;
        let mut sequence: Vec<GestureLabel> = Vec::with_capacity(len);
        for _ in 0..len {
            let previous = sequence.last().copied();
            let choices: Vec<GestureLabel> = SIMON_ALPHABET
                .into_iter()
                .filter(|g| self.tuning.allow_adjacent_repeats || Some(*g) != previous)
                .collect();
            sequence.push(choices[self.rng.gen_range(0..choices.len())]);
        }
        sequence
    }

    pub fn reset_stats(&mut self) {
        self.stats = SimonStats::default();
        self.state = SimonState::Waiting;
        self.sequence.clear();
        self.progress = 0;
        self.last_accepted = None;
    }

    /// Advances reveal, countdown, cooldown and auto-advance timers.
    pub fn tick(&mut self, now: Instant) {
        loop {
            match self.state {
                SimonState::Showing {
                    index,
                    revealed: true,
                    until,
                } if now >= until => {
                    self.state = SimonState::Showing {
                        index,
                        revealed: false,
                        until: until + self.tuning.gap,
                    };
                }
                SimonState::Showing {
                    index,
                    revealed: false,
                    until,
                } if now >= until => {
                    self.state = if index + 1 < self.sequence.len() {
                        SimonState::Showing {
                            index: index + 1,
                            revealed: true,
                            until: until + self.tuning.reveal,
                        }
                    } else {
                        SimonState::Countdown {
                            remaining: self.tuning.countdown_from.max(1),
                            next_at: until + self.tuning.countdown_step,
                        }
                    };
                }
                SimonState::Countdown { remaining, next_at } if now >= next_at => {
                    self.state = if remaining <= 1 {
                        SimonState::Playing {
                            cooldown_until: None,
                        }
                    } else {
                        SimonState::Countdown {
                            remaining: remaining - 1,
                            next_at: next_at + self.tuning.countdown_step,
                        }
                    };
                }
                SimonState::Playing {
                    cooldown_until: Some(until),
                } if now >= until => {
                    self.state = SimonState::Playing {
                        cooldown_until: None,
                    };
                }
                SimonState::Success { advance_at } if now >= advance_at => {
                    let sequence = self.generate_sequence();
                    self.begin_round_with(sequence, advance_at);
                }
                _ => return,
            }
        }
    }

    /// Feeds the current signal. Outside `Playing` it only re-arms the
    /// repeat guard.
    pub fn observe(&mut self, signal: Option<&GestureSignal>, now: Instant) -> Option<InputVerdict> {
        // Holding the accepted gesture never counts twice; showing anything
        // else, or no hand, lets it count again.
        let observed = signal.map(|s| s.label);
        if self.last_accepted.is_some() && self.last_accepted != observed {
            self.last_accepted = None;
        }

        let SimonState::Playing { cooldown_until } = self.state else {
            return None;
        };
        if cooldown_until.is_some_and(|until| now < until) {
            return None;
        }
        let signal = signal?;
        if signal.confidence < self.tuning.min_confidence
            || !SIMON_ALPHABET.contains(&signal.label)
            || self.last_accepted == Some(signal.label)
        {
            return None;
        }
        self.last_accepted = Some(signal.label);
        Some(self.accept(signal.label, now))
    }

    fn accept(&mut self, got: GestureLabel, now: Instant) -> InputVerdict {
        let expected = self.sequence[self.progress];
        if got != expected {
            log::info!(
                "simon-says: expected {:?}, got {:?} at level {}",
                expected,
                got,
                self.stats.level
            );
            self.stats.level = 1;
            self.stats.streak = 0;
            self.state = SimonState::Failure { expected, got };
            return InputVerdict::Wrong { expected, got };
        }

        self.progress += 1;
        if self.progress < self.sequence.len() {
            self.state = SimonState::Playing {
                cooldown_until: Some(now + self.tuning.input_cooldown),
            };
            return InputVerdict::Correct {
                matched: self.progress,
            };
        }

        let stats = &mut self.stats;
        stats.level += 1;
        stats.best_level = stats.best_level.max(stats.level);
        stats.streak += 1;
        stats.best_streak = stats.best_streak.max(stats.streak);
        log::info!("simon-says: sequence complete, advancing to level {}", stats.level);
        self.state = SimonState::Success {
            advance_at: now + self.tuning.advance_delay,
        };
        InputVerdict::Completed
    }
}

pub struct SimonConsumer {
    link: LiveLink,
    tuning: SimonTuning,
    seed: Option<u64>,
    game: Option<SimonGame>,
}

impl SimonConsumer {
    pub fn new(link: LiveLink, tuning: SimonTuning) -> Self {
        Self {
            link,
            tuning,
            seed: None,
            game: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn game(&self) -> Option<&SimonGame> {
        self.game.as_ref()
    }

    pub fn game_mut(&mut self) -> Option<&mut SimonGame> {
        self.game.as_mut()
    }

    fn ensure_game(&mut self) {
        if self.game.is_none() {
            let rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            self.game = Some(SimonGame::with_rng(rng, self.tuning));
        }
    }
}

impl GestureConsumer for SimonConsumer {
    fn kind(&self) -> ConsumerKind {
        ConsumerKind::SimonSays
    }

    fn link(&self) -> &LiveLink {
        &self.link
    }

    fn activate(&mut self, _now: Instant) -> Result<(), ConsumerError> {
        self.ensure_game();
        self.link.open()
    }

    fn deactivate(&mut self) {
        self.link.close();
        self.game = None;
    }

    fn update(&mut self, now: Instant) {
        let signal = self.link.current_gesture();
        if let Some(game) = self.game.as_mut() {
            game.tick(now);
            game.observe(signal.as_ref(), now);
        }
    }

    fn retry(&mut self, _now: Instant) -> Result<(), ConsumerError> {
        self.ensure_game();
        self.link.retry()
    }

    fn new_round(&mut self, now: Instant) {
        if let Some(game) = self.game.as_mut() {
            game.start(now);
        }
    }

    fn reset_stats(&mut self) {
        if let Some(game) = self.game.as_mut() {
            game.reset_stats();
        }
    }

    fn status_line(&self) -> String {
        if let Some(err) = self.link.error() {
            return format!("simon: error: {err}");
        }
        let Some(game) = self.game.as_ref() else {
            return "simon: inactive".to_string();
        };
        let stats = game.stats();
        let board = format!(
            "level {} (best {}) streak {} (best {})",
            stats.level, stats.best_level, stats.streak, stats.best_streak
        );
        let phase = match game.state() {
            SimonState::Waiting => "press n to play".to_string(),
            SimonState::Showing { index, .. } => match game.highlighted() {
                Some(label) => format!(
                    "watch {}/{}: {}{}",
                    index + 1,
                    game.sequence().len(),
                    label.emoji(),
                    label.display_name()
                ),
                None => format!("watch {}/{}", index + 1, game.sequence().len()),
            },
            SimonState::Countdown { remaining, .. } => format!("your turn in {remaining}..."),
            SimonState::Playing { .. } => {
                format!("repeat {}/{}", game.progress(), game.sequence().len())
            }
            SimonState::Success { .. } => "correct! next level coming".to_string(),
            SimonState::Failure { expected, got } => format!(
                "wrong: wanted {}, saw {} (press n to retry)",
                expected.display_name(),
                got.display_name()
            ),
        };
        format!("simon: {phase} | {board}")
    }
}
