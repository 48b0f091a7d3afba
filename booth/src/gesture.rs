use serde::Deserialize;

pub const THUMB_MCP: usize = 2;
pub const THUMB_TIP: usize = 4;
pub const INDEX_PIP: usize = 6;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_TIP: usize = 12;
pub const RING_PIP: usize = 14;
pub const RING_TIP: usize = 16;
pub const PINKY_PIP: usize = 18;
pub const PINKY_TIP: usize = 20;

/// Landmarks per hand.
pub const HAND_LANDMARKS: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    /// Closed fist, thumb up. Takes a photo.
    ThumbsUp,
    /// Index and middle raised.
    Love,
    /// Index alone.
    Sus,
}

fn extended(hand: &[Landmark], tip: usize, pip: usize) -> bool {
    hand[tip].y < hand[pip].y
}

/// Classify one hand. Hands with fewer than 21 landmarks give `None`.
///
/// Coordinates are normalized with y growing downwards, so a finger is
/// extended when its tip sits above its PIP joint.
pub fn classify(hand: &[Landmark]) -> Option<Gesture> {
    if hand.len() < HAND_LANDMARKS {
        return None;
    }
    let index = extended(hand, INDEX_TIP, INDEX_PIP);
    let middle = extended(hand, MIDDLE_TIP, MIDDLE_PIP);
    let ring = extended(hand, RING_TIP, RING_PIP);
    let pinky = extended(hand, PINKY_TIP, PINKY_PIP);

    if !index && !middle && !ring && !pinky && hand[THUMB_TIP].y < hand[THUMB_MCP].y {
        return Some(Gesture::ThumbsUp);
    }
    match (index, middle, ring, pinky) {
        (true, true, false, false) => Some(Gesture::Love),
        (true, false, false, false) => Some(Gesture::Sus),
        _ => None,
    }
}

/// Only the first hand counts.
pub fn classify_first(hands: &[Vec<Landmark>]) -> Option<Gesture> {
    hands.first().and_then(|hand| classify(hand))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A fist: every tip below its PIP, thumb tip below its MCP.
    fn fist() -> Vec<Landmark> {
        let mut hand = vec![Landmark { x: 0.5, y: 0.5, z: 0.0 }; HAND_LANDMARKS];
        for (tip, pip) in [
            (INDEX_TIP, INDEX_PIP),
            (MIDDLE_TIP, MIDDLE_PIP),
            (RING_TIP, RING_PIP),
            (PINKY_TIP, PINKY_PIP),
        ] {
            hand[pip].y = 0.5;
            hand[tip].y = 0.6;
        }
        hand[THUMB_MCP].y = 0.5;
        hand[THUMB_TIP].y = 0.55;
        hand
    }

    fn raise(hand: &mut [Landmark], tip: usize, pip: usize) {
        hand[tip].y = hand[pip].y - 0.1;
    }

    #[test]
    fn thumbs_up() {
        let mut hand = fist();
        hand[THUMB_TIP].y = 0.3;
        assert_eq!(classify(&hand), Some(Gesture::ThumbsUp));
    }

    #[test]
    fn fist_with_thumb_down_is_nothing() {
        assert_eq!(classify(&fist()), None);
    }

    #[test]
    fn peace_sign_is_love() {
        let mut hand = fist();
        raise(&mut hand, INDEX_TIP, INDEX_PIP);
        raise(&mut hand, MIDDLE_TIP, MIDDLE_PIP);
        assert_eq!(classify(&hand), Some(Gesture::Love));
    }

    #[test]
    fn pointing_is_sus() {
        let mut hand = fist();
        raise(&mut hand, INDEX_TIP, INDEX_PIP);
        assert_eq!(classify(&hand), Some(Gesture::Sus));
    }

    #[test]
    fn pointing_wins_over_thumb() {
        let mut hand = fist();
        hand[THUMB_TIP].y = 0.3;
        raise(&mut hand, INDEX_TIP, INDEX_PIP);
        assert_eq!(classify(&hand), Some(Gesture::Sus));
    }

    #[test]
    fn open_hand_is_nothing() {
        let mut hand = fist();
        for (tip, pip) in [
            (INDEX_TIP, INDEX_PIP),
            (MIDDLE_TIP, MIDDLE_PIP),
            (RING_TIP, RING_PIP),
            (PINKY_TIP, PINKY_PIP),
        ] {
            raise(&mut hand, tip, pip);
        }
        assert_eq!(classify(&hand), None);
    }

    #[test]
    fn short_hand_and_no_hands() {
        assert_eq!(classify(&fist()[..20]), None);
        assert_eq!(classify_first(&[]), None);
    }

    #[test]
    fn only_first_hand_counts() {
        let mut first = fist();
        raise(&mut first, INDEX_TIP, INDEX_PIP);
        let mut second = fist();
        second[THUMB_TIP].y = 0.3;
        assert_eq!(classify_first(&[first, second]), Some(Gesture::Sus));
    }
}
