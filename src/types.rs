use std::time::Instant;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn has_valid_dimensions(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

/// The closed set of gestures the classifier can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GestureLabel {
    None,
    ClosedFist,
    OpenPalm,
    PointingUp,
    ThumbDown,
    ThumbUp,
    Victory,
    ILoveYou,
}

impl GestureLabel {
    pub const ALL: [GestureLabel; 8] = [
        GestureLabel::None,
        GestureLabel::ClosedFist,
        GestureLabel::OpenPalm,
        GestureLabel::PointingUp,
        GestureLabel::ThumbDown,
        GestureLabel::ThumbUp,
        GestureLabel::Victory,
        GestureLabel::ILoveYou,
    ];

    /// Canonical name emitted by the classification model.
    pub fn model_name(&self) -> &'static str {
        match self {
            GestureLabel::None => "None",
            GestureLabel::ClosedFist => "Closed_Fist",
            GestureLabel::OpenPalm => "Open_Palm",
            GestureLabel::PointingUp => "Pointing_Up",
            GestureLabel::ThumbDown => "Thumb_Down",
            GestureLabel::ThumbUp => "Thumb_Up",
            GestureLabel::Victory => "Victory",
            GestureLabel::ILoveYou => "ILoveYou",
        }
    }

    pub fn from_model_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.model_name() == name)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            GestureLabel::None => "Ninguno",
            GestureLabel::ClosedFist => "Puño Cerrado",
            GestureLabel::OpenPalm => "Palma Abierta",
            GestureLabel::PointingUp => "Apuntando Arriba",
            GestureLabel::ThumbDown => "Pulgar Abajo",
            GestureLabel::ThumbUp => "Pulgar Arriba",
            GestureLabel::Victory => "Victoria",
            GestureLabel::ILoveYou => "Te Quiero",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            GestureLabel::None => "⋯ ",
            GestureLabel::ClosedFist => "✊ ",
            GestureLabel::OpenPalm => "🖐 ",
            GestureLabel::PointingUp => "☝️ ",
            GestureLabel::ThumbDown => "👎 ",
            GestureLabel::ThumbUp => "👍 ",
            GestureLabel::Victory => "✌️ ",
            GestureLabel::ILoveYou => "🤟 ",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GestureScore {
    pub label: GestureLabel,
    pub confidence: f32,
}

/// One tracked hand. `gestures` is ranked, best first.
#[derive(Clone, Debug)]
pub struct HandDetection {
    pub gestures: Vec<GestureScore>,
    pub handedness: Handedness,
    pub landmarks: Vec<(f32, f32)>,
}

impl HandDetection {
    pub fn top_gesture(&self) -> Option<GestureScore> {
        self.gestures.first().copied()
    }
}

#[derive(Clone, Debug, Default)]
pub struct DetectionFrame {
    pub hands: Vec<HandDetection>,
}

impl DetectionFrame {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(hand: HandDetection) -> Self {
        Self { hands: vec![hand] }
    }

    /// The first hand's first-ranked gesture, which is all the session publishes.
    pub fn primary(&self) -> Option<(&HandDetection, GestureScore)> {
        let hand = self.hands.first()?;
        let top = hand.top_gesture()?;
        Some((hand, top))
    }
}

/// Human-facing view of the latest detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GestureSignal {
    pub label: GestureLabel,
    pub display_name: String,
    pub confidence: u8,
    pub handedness: Handedness,
}

impl GestureSignal {
    pub fn from_detection(hand: &HandDetection, score: GestureScore) -> Self {
        Self {
            label: score.label,
            display_name: score.label.display_name().to_string(),
            confidence: percent(score.confidence),
            handedness: hand.handedness,
        }
    }

    pub fn display_text(&self) -> String {
        format!(
            "{}{} ({}%, {})",
            self.label.emoji(),
            self.display_name,
            self.confidence,
            self.handedness.label()
        )
    }
}

pub fn percent(confidence: f32) -> u8 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u8
}
