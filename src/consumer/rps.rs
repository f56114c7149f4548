//! Rock-Paper-Scissors against a random opponent, played with hand shapes.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{ConsumerKind, GestureConsumer, LiveLink};
use crate::{
    error::ConsumerError,
    types::{GestureLabel, GestureSignal},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Throw {
    Rock,
    Paper,
    Scissors,
}

impl Throw {
    pub const ALL: [Throw; 3] = [Throw::Rock, Throw::Paper, Throw::Scissors];

    pub fn from_gesture(label: GestureLabel) -> Option<Throw> {
        match label {
            GestureLabel::ClosedFist => Some(Throw::Rock),
            GestureLabel::OpenPalm => Some(Throw::Paper),
            GestureLabel::Victory => Some(Throw::Scissors),
            _ => None,
        }
    }

    pub fn beats(self, other: Throw) -> bool {
        matches!(
            (self, other),
            (Throw::Rock, Throw::Scissors)
                | (Throw::Paper, Throw::Rock)
                | (Throw::Scissors, Throw::Paper)
        )
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Throw {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Throw::Rock => "Piedra",
            Throw::Paper => "Papel",
            Throw::Scissors => "Tijera",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Lose,
    Tie,
}

impl Outcome {
    /// Outcome from the player's point of view.
    pub fn decide(player: Throw, opponent: Throw) -> Outcome {
        if player == opponent {
            Outcome::Tie
        } else if player.beats(opponent) {
            Outcome::Win
        } else {
            Outcome::Lose
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundResult {
    pub player: Throw,
    pub opponent: Throw,
    pub outcome: Outcome,
    /// The window ran out and the player's throw was picked at random.
    pub substituted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpsState {
    Waiting,
    Countdown { remaining: u8, next_at: Instant },
    Playing { deadline: Instant },
    Result(RoundResult),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RpsStats {
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub streak: u32,
    pub best_streak: u32,
}

impl RpsStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win => {
                self.wins += 1;
                self.streak += 1;
                self.best_streak = self.best_streak.max(self.streak);
            }
            Outcome::Lose => {
                self.losses += 1;
                self.streak = 0;
            }
            Outcome::Tie => self.ties += 1,
        }
    }

    pub fn rounds(&self) -> u32 {
        self.wins + self.losses + self.ties
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RpsTuning {
    pub countdown_from: u8,
    pub countdown_step: Duration,
    pub play_window: Duration,
    /// Signals below this confidence (0-100) are not taken as a throw.
    pub min_confidence: u8,
}

impl Default for RpsTuning {
    fn default() -> Self {
        Self {
            countdown_from: 3,
            countdown_step: Duration::from_secs(1),
            play_window: Duration::from_secs(3),
            min_confidence: 0,
        }
    }
}

pub struct RpsGame<R = StdRng> {
    rng: R,
    tuning: RpsTuning,
    state: RpsState,
    stats: RpsStats,
}

impl RpsGame<StdRng> {
    pub fn new(tuning: RpsTuning) -> Self {
        Self::with_rng(StdRng::from_entropy(), tuning)
    }
}

impl<R: Rng> RpsGame<R> {
    pub fn with_rng(rng: R, tuning: RpsTuning) -> Self {
        Self {
            rng,
            tuning,
            state: RpsState::Waiting,
            stats: RpsStats::default(),
        }
    }

    pub fn state(&self) -> RpsState {
        self.state
    }

    pub fn stats(&self) -> RpsStats {
        self.stats
    }

    /// Starts the countdown from `Waiting`, or plays again from a result.
    /// Returns false while a round is in progress.
    pub fn new_game(&mut self, now: Instant) -> bool {
        match self.state {
            RpsState::Waiting | RpsState::Result(_) => {
                self.state = RpsState::Countdown {
                    remaining: self.tuning.countdown_from.max(1),
                    next_at: now + self.tuning.countdown_step,
                };
                true
            }
            RpsState::Countdown { .. } | RpsState::Playing { .. } => false,
        }
    }

    pub fn play_again(&mut self, now: Instant) -> bool {
        matches!(self.state, RpsState::Result(_)) && self.new_game(now)
    }

    pub fn reset_stats(&mut self) {
        self.stats = RpsStats::default();
        self.state = RpsState::Waiting;
    }

    /// Advances timers. Returns the result when the play window expired.
    pub fn tick(&mut self, now: Instant) -> Option<RoundResult> {
        loop {
            match self.state {
                RpsState::Countdown { remaining, next_at } if now >= next_at => {
                    self.state = if remaining <= 1 {
                        RpsState::Playing {
                            deadline: next_at + self.tuning.play_window,
                        }
                    } else {
                        RpsState::Countdown {
                            remaining: remaining - 1,
                            next_at: next_at + self.tuning.countdown_step,
                        }
                    };
                }
                RpsState::Playing { deadline } if now >= deadline => {
                    let substitute = Throw::random(&mut self.rng);
                    log::info!("no throw seen in time, playing {:?}", substitute);
                    return Some(self.resolve(substitute, true));
                }
                _ => return None,
            }
        }
    }

    /// Takes the first qualifying gesture of the play window as the throw.
    pub fn observe(&mut self, signal: Option<&GestureSignal>, now: Instant) -> Option<RoundResult> {
        let RpsState::Playing { deadline } = self.state else {
            return None;
        };
        if now >= deadline {
            return None;
        }
        let signal = signal?;
        if signal.confidence < self.tuning.min_confidence {
            return None;
        }
        let throw = Throw::from_gesture(signal.label)?;
        Some(self.resolve(throw, false))
    }

    fn resolve(&mut self, player: Throw, substituted: bool) -> RoundResult {
        let opponent = Throw::random(&mut self.rng);
        let outcome = Outcome::decide(player, opponent);
        self.stats.record(outcome);
        let result = RoundResult {
            player,
            opponent,
            outcome,
            substituted,
        };
        log::info!(
            "rock-paper-scissors: {:?} vs {:?} -> {:?}",
            player,
            opponent,
            outcome
        );
        self.state = RpsState::Result(result);
        result
    }
}

pub struct RpsConsumer {
    link: LiveLink,
    tuning: RpsTuning,
    seed: Option<u64>,
    game: Option<RpsGame>,
}

impl RpsConsumer {
    pub fn new(link: LiveLink, tuning: RpsTuning) -> Self {
        Self {
            link,
            tuning,
            seed: None,
            game: None,
        }
    }

    /// Makes every game created by this consumer reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn game(&self) -> Option<&RpsGame> {
        self.game.as_ref()
    }

    pub fn game_mut(&mut self) -> Option<&mut RpsGame> {
        self.game.as_mut()
    }

    fn ensure_game(&mut self) {
        if self.game.is_none() {
            let rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            self.game = Some(RpsGame::with_rng(rng, self.tuning));
        }
    }
}

impl GestureConsumer for RpsConsumer {
    fn kind(&self) -> ConsumerKind {
        ConsumerKind::RockPaperScissors
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
            if game.tick(now).is_none() {
                game.observe(signal.as_ref(), now);
            }
        }
    }

    fn retry(&mut self, _now: Instant) -> Result<(), ConsumerError> {
        self.ensure_game();
        self.link.retry()
    }

    fn new_round(&mut self, now: Instant) {
        if let Some(game) = self.game.as_mut() {
            game.new_game(now);
        }
    }

    fn reset_stats(&mut self) {
        if let Some(game) = self.game.as_mut() {
            game.reset_stats();
        }
    }

    fn status_line(&self) -> String {
        if let Some(err) = self.link.error() {
            return format!("rps: error: {err}");
        }
        let Some(game) = self.game.as_ref() else {
            return "rps: inactive".to_string();
        };
        let stats = game.stats();
        let board = format!(
            "W{} L{} T{} streak {} (best {})",
            stats.wins, stats.losses, stats.ties, stats.streak, stats.best_streak
        );
        let phase = match game.state() {
            RpsState::Waiting => "press n to play".to_string(),
            RpsState::Countdown { remaining, .. } => format!("{remaining}..."),
            RpsState::Playing { .. } => "show your hand!".to_string(),
            RpsState::Result(result) => {
                let verdict = match result.outcome {
                    Outcome::Win => "you win",
                    Outcome::Lose => "you lose",
                    Outcome::Tie => "tie",
                };
                let picked = if result.substituted { " (too slow)" } else { "" };
                format!(
                    "{}{} vs {}: {}",
                    result.player.label(),
                    picked,
                    result.opponent.label(),
                    verdict
                )
            }
        };
        format!("rps: {phase} | {board}")
    }
}
