//! Landmark geometry to canned gesture labels.
//!
//! Each finger is classified as extended, half bent or folded from the 21
//! hand landmarks; gestures are then scored against a table of expected
//! finger states.

use crate::types::{GestureLabel, GestureScore};

/// Rules scoring below this are not reported.
const MIN_RULE_SCORE: f32 = 0.7;

const THUMB: usize = 0;
const INDEX: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FingerState {
    Extended,
    HalfBent,
    Folded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

struct Rule {
    label: GestureLabel,
    /// Thumb to pinky; `None` means any state.
    fingers: [Option<FingerState>; 5],
    /// Finger whose tip must point in the given direction.
    pointing: Option<(usize, Direction)>,
}

use FingerState::{Extended as E, Folded as F};

const RULES: &[Rule] = &[
    Rule {
        label: GestureLabel::ClosedFist,
        fingers: [Some(F), Some(F), Some(F), Some(F), Some(F)],
        pointing: None,
    },
    Rule {
        label: GestureLabel::OpenPalm,
        fingers: [Some(E), Some(E), Some(E), Some(E), Some(E)],
        pointing: None,
    },
    Rule {
        label: GestureLabel::PointingUp,
        fingers: [None, Some(E), Some(F), Some(F), Some(F)],
        pointing: Some((INDEX, Direction::Up)),
    },
    Rule {
        label: GestureLabel::Victory,
        fingers: [None, Some(E), Some(E), Some(F), Some(F)],
        pointing: None,
    },
    Rule {
        label: GestureLabel::ILoveYou,
        fingers: [Some(E), Some(E), Some(F), Some(F), Some(E)],
        pointing: None,
    },
    Rule {
        label: GestureLabel::ThumbUp,
        fingers: [Some(E), Some(F), Some(F), Some(F), Some(F)],
        pointing: Some((THUMB, Direction::Up)),
    },
    Rule {
        label: GestureLabel::ThumbDown,
        fingers: [Some(E), Some(F), Some(F), Some(F), Some(F)],
        pointing: Some((THUMB, Direction::Down)),
    },
];

/// Base and tip landmark indices per finger, thumb first.
const FINGER_JOINTS: [(usize, usize); 5] = [(2, 4), (5, 8), (9, 12), (13, 16), (17, 20)];

/// Scores every gesture rule against the landmarks, best first. Hands that
/// match no rule report [`GestureLabel::None`].
pub fn rank_gestures(raw_landmarks: &[[f32; 3]]) -> Vec<GestureScore> {
    let Some(states) = finger_states(raw_landmarks) else {
        return Vec::new();
    };

    let mut ranked: Vec<GestureScore> = RULES
        .iter()
        .filter_map(|rule| {
            let confidence = score_rule(rule, &states, raw_landmarks);
            (confidence >= MIN_RULE_SCORE).then_some(GestureScore {
                label: rule.label,
                confidence,
            })
        })
        .collect();

    // Stable sort: earlier rules win ties.
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    if ranked.is_empty() {
        ranked.push(GestureScore {
            label: GestureLabel::None,
            confidence: 1.0,
        });
    }
    ranked
}

pub fn finger_states(raw_landmarks: &[[f32; 3]]) -> Option<[FingerState; 5]> {
    if raw_landmarks.len() < 21 {
        return None;
    }
    let (normalized, _span) = normalize_landmarks(raw_landmarks);
    Some([
        classify_thumb(&normalized),
        classify_finger(&normalized, [5, 6, 7, 8]),
        classify_finger(&normalized, [9, 10, 11, 12]),
        classify_finger(&normalized, [13, 14, 15, 16]),
        classify_finger(&normalized, [17, 18, 19, 20]),
    ])
}

fn score_rule(rule: &Rule, states: &[FingerState; 5], landmarks: &[[f32; 3]]) -> f32 {
    if let Some((finger, direction)) = rule.pointing {
        let (base, tip) = FINGER_JOINTS[finger];
        // Image coordinates grow downwards.
        let pointing_up = landmarks[tip][1] < landmarks[base][1];
        if pointing_up != (direction == Direction::Up) {
            return 0.0;
        }
    }

    let mut total = 0.0;
    let mut constrained = 0;
    for (expected, actual) in rule.fingers.iter().zip(states) {
        let Some(expected) = expected else {
            continue;
        };
        constrained += 1;
        total += match (expected, actual) {
            (a, b) if a == b => 1.0,
            (_, FingerState::HalfBent) => 0.5,
            _ => 0.0,
        };
    }

    if constrained == 0 {
        0.0
    } else {
        total / constrained as f32
    }
}

fn normalize_landmarks(points: &[[f32; 3]]) -> (Vec<[f32; 3]>, f32) {
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;

    for [x, y, _z] in points {
        min_x = min_x.min(*x);
        min_y = min_y.min(*y);
        max_x = max_x.max(*x);
        max_y = max_y.max(*y);
    }

    let span = (max_x - min_x).max(max_y - min_y).max(1e-3);
    let normalized = points
        .iter()
        .map(|[x, y, z]| [(*x - min_x) / span, (*y - min_y) / span, *z / span])
        .collect();

    (normalized, span)
}

fn classify_finger(points: &[[f32; 3]], idx: [usize; 4]) -> FingerState {
    let wrist = points[0];
    let [mcp, pip, dip, tip] = idx.map(|i| points[i]);

    let dist_tip = distance3(tip, wrist);
    let dist_pip = distance3(pip, wrist);
    let dist_mcp = distance3(mcp, wrist);

    let straightness = average_straightness(sub(pip, mcp), sub(dip, pip), sub(tip, dip));
    let extension = dist_tip - dist_pip;
    let reach = dist_tip - dist_mcp;

    if extension > 0.15 && straightness > 0.40 && reach > 0.06 {
        FingerState::Extended
    } else if extension < 0.08 || straightness < 0.18 || reach < 0.05 {
        FingerState::Folded
    } else {
        FingerState::HalfBent
    }
}

fn classify_thumb(points: &[[f32; 3]]) -> FingerState {
    let wrist = points[0];
    let [cmc, mcp, ip, tip] = [1, 2, 3, 4].map(|i| points[i]);

    let dist_tip_wrist = distance3(tip, wrist);
    let dist_ip_wrist = distance3(ip, wrist);
    let dist_mcp_wrist = distance3(mcp, wrist);

    // How close the tip sits to the palm.
    let spread = distance3(tip, points[5]).min(distance3(tip, points[17]));
    let straightness = average_straightness(sub(mcp, cmc), sub(ip, mcp), sub(tip, ip));
    let extension = dist_tip_wrist - dist_ip_wrist;
    let reach = dist_tip_wrist - dist_mcp_wrist;

    if spread < 0.25 && (straightness < 0.28 || reach < 0.15) {
        FingerState::Folded
    } else if dist_tip_wrist > 0.30 && straightness > 0.28 && extension > 0.08 {
        FingerState::Extended
    } else {
        FingerState::HalfBent
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn distance3(a: [f32; 3], b: [f32; 3]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

fn average_straightness(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> f32 {
    let ab = dot(unit(a), unit(b));
    let bc = dot(unit(b), unit(c));
    ((ab + bc) / 2.0).clamp(-1.0, 1.0)
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn unit(v: [f32; 3]) -> [f32; 3] {
    let len = dot(v, v).sqrt();
    if len < 1e-5 {
        [0.0, 0.0, 0.0]
    } else {
        [v[0] / len, v[1] / len, v[2] / len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASES: [(f32, f32); 4] = [(-0.3, -1.0), (-0.1, -1.05), (0.1, -1.0), (0.3, -0.9)];

    #[derive(Clone, Copy)]
    enum Thumb {
        Tucked,
        Side,
        Up,
    }

    /// Synthetic right hand with the wrist at the origin and fingers pointing
    /// towards negative y.
    fn hand(thumb: Thumb, extended: [bool; 4]) -> Vec<[f32; 3]> {
        let mut points = vec![[0.0, 0.0, 0.0]];
        let thumb_points: [[f32; 2]; 4] = match thumb {
            Thumb::Tucked => [[-0.3, -0.2], [-0.5, -0.45], [-0.45, -0.7], [-0.25, -0.8]],
            Thumb::Side => [[-0.3, -0.2], [-0.6, -0.4], [-0.85, -0.55], [-1.1, -0.7]],
            Thumb::Up => [[-0.3, -0.2], [-0.4, -0.6], [-0.47, -1.0], [-0.55, -1.45]],
        };
        points.extend(thumb_points.iter().map(|[x, y]| [*x, *y, 0.0]));

        for ((bx, by), is_extended) in BASES.into_iter().zip(extended) {
            let ys = if is_extended {
                [by, by - 0.4, by - 0.7, by - 1.0]
            } else {
                [by, by - 0.3, by - 0.1, by + 0.2]
            };
            points.extend(ys.iter().map(|y| [bx, *y, 0.0]));
        }
        points
    }

    fn flip_vertical(points: &[[f32; 3]]) -> Vec<[f32; 3]> {
        points.iter().map(|[x, y, z]| [*x, -*y, *z]).collect()
    }

    fn top(points: &[[f32; 3]]) -> GestureLabel {
        rank_gestures(points)[0].label
    }

    #[test]
    fn finger_states_for_open_hand() {
        let states = finger_states(&hand(Thumb::Side, [true; 4])).unwrap();
        assert_eq!(states, [FingerState::Extended; 5]);
    }

    #[test]
    fn recognizes_canned_gestures() {
        assert_eq!(top(&hand(Thumb::Side, [true; 4])), GestureLabel::OpenPalm);
        assert_eq!(top(&hand(Thumb::Tucked, [false; 4])), GestureLabel::ClosedFist);
        assert_eq!(
            top(&hand(Thumb::Tucked, [true, true, false, false])),
            GestureLabel::Victory
        );
        assert_eq!(
            top(&hand(Thumb::Tucked, [true, false, false, false])),
            GestureLabel::PointingUp
        );
        assert_eq!(
            top(&hand(Thumb::Side, [true, false, false, true])),
            GestureLabel::ILoveYou
        );
        assert_eq!(top(&hand(Thumb::Up, [false; 4])), GestureLabel::ThumbUp);
    }

    #[test]
    fn thumb_direction_separates_up_from_down() {
        let down = flip_vertical(&hand(Thumb::Up, [false; 4]));
        assert_eq!(top(&down), GestureLabel::ThumbDown);
    }

    #[test]
    fn unmatched_pose_reports_none() {
        // Middle and pinky only: no rule covers it.
        let ranked = rank_gestures(&hand(Thumb::Tucked, [false, true, false, true]));
        assert_eq!(ranked[0].label, GestureLabel::None);
    }

    #[test]
    fn too_few_landmarks_rank_nothing() {
        assert!(rank_gestures(&[[0.0; 3]; 5]).is_empty());
    }
}
