//! Pure interaction planning.
//!
//! Everything stochastic about pointer paths, typing and scrolling is
//! computed here as plain data, separated from CDP dispatch so the motion
//! and timing statistics can be unit-tested without a browser. Straight
//! lines, constant velocity and single large deltas are the signatures of
//! scripted input; these planners avoid all three.

use rand::Rng;

/// Inter-key delay bounds in milliseconds.
pub const KEY_DELAY_MIN_MS: u64 = 60;
pub const KEY_DELAY_MAX_MS: u64 = 180;

/// Probability of an adjacent-key typo per character.
const TYPO_PROBABILITY: f64 = 0.03;
/// Probability of an extra hesitation after a space.
const WORD_PAUSE_PROBABILITY: f64 = 0.30;

/// QWERTY rows used to pick a plausible wrong key.
const KEY_ROWS: &[&str] = &["qwertyuiop", "asdfghjkl", "zxcvbnm"];

/// One keyboard action with the pause that follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyAction {
    Press(char),
    Backspace,
}

/// A scheduled keystroke.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyStep {
    pub action: KeyAction,
    /// Delay after this action, in milliseconds.
    pub delay_ms: u64,
}

/// A key physically adjacent to `c` on a QWERTY layout, if one exists.
pub fn adjacent_key(c: char) -> Option<char> {
    let lower = c.to_ascii_lowercase();
    for row in KEY_ROWS {
        if let Some(pos) = row.find(lower) {
            // Prefer the left neighbor, fall back to the right.
            let bytes = row.as_bytes();
            let neighbor = if pos > 0 { bytes[pos - 1] } else { bytes[pos + 1] };
            return Some(neighbor as char);
        }
    }
    None
}

/// Plan the keystroke sequence for `text`.
///
/// With typos enabled, each alphabetic character has a small chance of
/// being typed as an adjacent wrong key first, noticed (pause), erased
/// (backspace), and retyped: self-correction, never an uncorrected error.
/// After a space there is a moderate chance of an extra word-boundary
/// hesitation. The committed text always equals `text`.
pub fn typing_plan(text: &str, make_typos: bool, rng: &mut impl Rng) -> Vec<KeyStep> {
    let mut steps = Vec::new();

    for c in text.chars() {
        if make_typos && rng.gen_bool(TYPO_PROBABILITY) {
            if let Some(wrong) = adjacent_key(c) {
                // Wrong key, then the pause of noticing the mistake.
                steps.push(KeyStep {
                    action: KeyAction::Press(wrong),
                    delay_ms: rng.gen_range(200..500),
                });
                steps.push(KeyStep {
                    action: KeyAction::Backspace,
                    delay_ms: rng.gen_range(100..250),
                });
            }
        }

        let mut delay_ms = rng.gen_range(KEY_DELAY_MIN_MS..=KEY_DELAY_MAX_MS);
        if c == ' ' && rng.gen_bool(WORD_PAUSE_PROBABILITY) {
            delay_ms += rng.gen_range(200..600);
        }
        steps.push(KeyStep {
            action: KeyAction::Press(c),
            delay_ms,
        });
    }

    steps
}

/// Text left in the field after executing a plan. Test helper semantics,
/// but kept here because it defines what a plan means.
pub fn committed_text(plan: &[KeyStep]) -> String {
    let mut out = String::new();
    for step in plan {
        match step.action {
            KeyAction::Press(c) => out.push(c),
            KeyAction::Backspace => {
                out.pop();
            }
        }
    }
    out
}

/// Quadratic Bézier pointer path from `from` to `to`.
///
/// One control point is offset at random from the midpoint, and the curve
/// is walked in 10-25 interpolated steps.
pub fn bezier_path(
    from: (f64, f64),
    to: (f64, f64),
    rng: &mut impl Rng,
) -> Vec<(f64, f64)> {
    let steps = rng.gen_range(10..=25);
    let mid_x = (from.0 + to.0) / 2.0;
    let mid_y = (from.1 + to.1) / 2.0;
    let control = (
        mid_x + rng.gen_range(-80.0..80.0),
        mid_y + rng.gen_range(-80.0..80.0),
    );

    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            let mt = 1.0 - t;
            (
                mt * mt * from.0 + 2.0 * mt * t * control.0 + t * t * to.0,
                mt * mt * from.1 + 2.0 * mt * t * control.1 + t * t * to.1,
            )
        })
        .collect()
}

/// Pick a click point inside the inner 40-70% band of a bounding box:
/// off the exact center and away from the edges.
pub fn click_point(x: f64, y: f64, width: f64, height: f64, rng: &mut impl Rng) -> (f64, f64) {
    let fx = rng.gen_range(0.40..0.70);
    let fy = rng.gen_range(0.40..0.70);
    (x + width * fx, y + height * fy)
}

/// Break a scroll of random total magnitude (100-500px) into 3-8 wheel
/// steps. Positive deltas scroll down.
pub fn scroll_plan(direction: ScrollDirection, rng: &mut impl Rng) -> Vec<f64> {
    let total = rng.gen_range(100.0..500.0);
    split_delta(
        match direction {
            ScrollDirection::Down => total,
            ScrollDirection::Up => -total,
        },
        rng,
    )
}

/// Break an exact delta into 3-8 steps of the same character as
/// [`scroll_plan`], preserving the total.
pub fn split_delta(delta: f64, rng: &mut impl Rng) -> Vec<f64> {
    let steps = rng.gen_range(3..=8);
    let per_step = delta / steps as f64;
    let mut out = Vec::with_capacity(steps);
    let mut emitted = 0.0;
    for i in 0..steps {
        let step = if i == steps - 1 {
            delta - emitted
        } else {
            per_step + rng.gen_range(-15.0..15.0)
        };
        emitted += step;
        out.push(step);
    }
    out
}

/// Scroll direction for wheel sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

/// One iteration of the reading loop.
#[derive(Debug, Clone)]
pub struct ReadingStep {
    pub direction: ScrollDirection,
    /// Whether to drift the pointer to a random viewport point.
    pub pointer_drift: bool,
    /// Pause before the next iteration, in milliseconds.
    pub pause_ms: u64,
}

/// Draw the randomized action for one reading-loop iteration: 70% scroll
/// down / 30% up, with a ~30% chance of an untargeted pointer move.
pub fn reading_step(rng: &mut impl Rng) -> ReadingStep {
    ReadingStep {
        direction: if rng.gen_bool(0.7) {
            ScrollDirection::Down
        } else {
            ScrollDirection::Up
        },
        pointer_drift: rng.gen_bool(0.3),
        pause_ms: rng.gen_range(800..2500),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_typing_plan_without_typos_is_one_press_per_char() {
        let mut rng = StdRng::seed_from_u64(7);
        let plan = typing_plan("hello", false, &mut rng);
        assert_eq!(plan.len(), 5);
        for (step, expected) in plan.iter().zip("hello".chars()) {
            assert_eq!(step.action, KeyAction::Press(expected));
            assert!((KEY_DELAY_MIN_MS..=KEY_DELAY_MAX_MS).contains(&step.delay_ms));
        }
        assert_eq!(committed_text(&plan), "hello");
    }

    #[test]
    fn test_typing_plan_with_typos_commits_original_text() {
        // Across many seeds, typos may add press/backspace pairs but the
        // committed text never drops below the original string.
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let text = "the quick brown fox jumps over the lazy dog";
            let plan = typing_plan(text, true, &mut rng);
            assert!(plan.len() >= text.chars().count());
            assert_eq!(committed_text(&plan), text);
        }
    }

    #[test]
    fn test_typo_pairs_are_adjacent_keys() {
        let mut found_typo = false;
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = typing_plan("abcdefghij", true, &mut rng);
            for window in plan.windows(3) {
                if let (KeyAction::Press(wrong), KeyAction::Backspace, KeyAction::Press(right)) =
                    (&window[0].action, &window[1].action, &window[2].action)
                {
                    assert_eq!(adjacent_key(*right), Some(*wrong));
                    found_typo = true;
                }
            }
        }
        assert!(found_typo, "no typo generated across 200 seeds");
    }

    #[test]
    fn test_adjacent_key_stays_on_keyboard() {
        for c in "qwertyuiopasdfghjklzxcvbnm".chars() {
            let adj = adjacent_key(c).unwrap();
            assert!(adj.is_ascii_alphabetic());
            assert_ne!(adj, c);
        }
        assert_eq!(adjacent_key('7'), None);
    }

    #[test]
    fn test_bezier_path_hits_endpoints_and_curves() {
        let mut rng = StdRng::seed_from_u64(11);
        let from = (100.0, 100.0);
        let to = (600.0, 400.0);
        let path = bezier_path(from, to, &mut rng);

        assert!((11..=26).contains(&path.len()));
        let first = path.first().unwrap();
        let last = path.last().unwrap();
        assert!((first.0 - from.0).abs() < 1e-9 && (first.1 - from.1).abs() < 1e-9);
        assert!((last.0 - to.0).abs() < 1e-9 && (last.1 - to.1).abs() < 1e-9);

        // At least one interior point deviates from the straight line.
        let deviates = path[1..path.len() - 1].iter().any(|(x, y)| {
            let t = (x - from.0) / (to.0 - from.0);
            let line_y = from.1 + t * (to.1 - from.1);
            (y - line_y).abs() > 1.0
        });
        assert!(deviates, "path is a straight line");
    }

    #[test]
    fn test_click_point_stays_in_band() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let (px, py) = click_point(10.0, 20.0, 100.0, 50.0, &mut rng);
            assert!(px >= 10.0 + 40.0 && px <= 10.0 + 70.0);
            assert!(py >= 20.0 + 20.0 && py <= 20.0 + 35.0);
        }
    }

    #[test]
    fn test_scroll_plan_bounds() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let plan = scroll_plan(ScrollDirection::Down, &mut rng);
            assert!((3..=8).contains(&plan.len()));
            let total: f64 = plan.iter().sum();
            assert!(total >= 100.0 - 1e-6 && total <= 500.0 + 1e-6);

            let up: f64 = scroll_plan(ScrollDirection::Up, &mut rng).iter().sum();
            assert!(up <= -100.0 + 1e-6);
        }
    }

    #[test]
    fn test_split_delta_preserves_total() {
        let mut rng = StdRng::seed_from_u64(9);
        for delta in [-730.0, -120.0, 250.0, 1400.0] {
            let plan = split_delta(delta, &mut rng);
            let total: f64 = plan.iter().sum();
            assert!((total - delta).abs() < 1e-6);
        }
    }

    #[test]
    fn test_reading_step_bias() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut down = 0u32;
        let mut drift = 0u32;
        let n = 10_000;
        for _ in 0..n {
            let step = reading_step(&mut rng);
            if step.direction == ScrollDirection::Down {
                down += 1;
            }
            if step.pointer_drift {
                drift += 1;
            }
            assert!((800..2500).contains(&step.pause_ms));
        }
        let down_ratio = down as f64 / n as f64;
        let drift_ratio = drift as f64 / n as f64;
        assert!((0.67..0.73).contains(&down_ratio), "down ratio {down_ratio}");
        assert!((0.27..0.33).contains(&drift_ratio), "drift ratio {drift_ratio}");
    }
}
