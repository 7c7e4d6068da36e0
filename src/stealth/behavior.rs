//! Humanized interaction plans: mouse paths, scrolling, and typing
//! cadence. Plans are generated as data so they can be tested, then
//! rendered to a script the engine runs in the page.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How much interaction noise to generate per page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorProfile {
    Minimal,
    #[default]
    Default,
    Aggressive,
}

/// One step of the interaction plan.
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorStep {
    /// Move the pointer to (x, y), arriving after `delay_ms`.
    MouseMove { x: f64, y: f64, delay_ms: u64 },
    /// Scroll vertically by `dy` pixels, then pause `pause_ms`.
    ScrollBy { dy: i64, pause_ms: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct BehaviorPlan {
    pub steps: Vec<BehaviorStep>,
}

impl BehaviorPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total wall-clock the plan takes to execute.
    pub fn duration_ms(&self) -> u64 {
        self.steps
            .iter()
            .map(|s| match s {
                BehaviorStep::MouseMove { delay_ms, .. } => *delay_ms,
                BehaviorStep::ScrollBy { pause_ms, .. } => *pause_ms,
            })
            .sum()
    }
}

/// Sample a curved mouse path toward a random in-viewport target.
///
/// Points follow a quadratic curve through a displaced midpoint, with
/// per-step timing noise, so the trace is neither straight nor uniform.
pub fn mouse_path<R: Rng>(rng: &mut R, width: u32, height: u32) -> Vec<BehaviorStep> {
    let (w, h) = (width.max(2) as f64, height.max(2) as f64);
    let start = (rng.gen_range(0.0..w), rng.gen_range(0.0..h));
    let end = (rng.gen_range(0.0..w), rng.gen_range(0.0..h));

    // Control point displaced perpendicular-ish to the segment.
    let mid = (
        (start.0 + end.0) / 2.0 + rng.gen_range(-w / 4.0..w / 4.0),
        (start.1 + end.1) / 2.0 + rng.gen_range(-h / 4.0..h / 4.0),
    );

    let samples = rng.gen_range(8..=20);
    let mut steps = Vec::with_capacity(samples);
    for i in 0..samples {
        let t = (i + 1) as f64 / samples as f64;
        let inv = 1.0 - t;
        let x = inv * inv * start.0 + 2.0 * inv * t * mid.0 + t * t * end.0;
        let y = inv * inv * start.1 + 2.0 * inv * t * mid.1 + t * t * end.1;
        steps.push(BehaviorStep::MouseMove {
            x: x.clamp(0.0, w),
            y: y.clamp(0.0, h),
            delay_ms: rng.gen_range(8..40),
        });
    }
    steps
}

/// Scroll in several segments with reading-like pauses, occasionally
/// backtracking a little.
pub fn scroll_plan<R: Rng>(rng: &mut R, segments: usize) -> Vec<BehaviorStep> {
    let mut steps = Vec::new();
    for _ in 0..segments {
        steps.push(BehaviorStep::ScrollBy {
            dy: rng.gen_range(300..=800),
            pause_ms: rng.gen_range(500..=1500),
        });
        if rng.gen_bool(0.3) {
            steps.push(BehaviorStep::ScrollBy {
                dy: -rng.gen_range(50..=150),
                pause_ms: rng.gen_range(200..=500),
            });
        }
    }
    steps
}

/// Per-character typing delays: mostly 50-200 ms, with rare longer
/// hesitations.
pub fn typing_delays<R: Rng>(rng: &mut R, chars: usize) -> Vec<u64> {
    (0..chars)
        .map(|_| {
            if rng.gen_bool(0.05) {
                rng.gen_range(300..=800)
            } else {
                rng.gen_range(50..=200)
            }
        })
        .collect()
}

/// Build the interaction plan for one page visit.
pub fn plan_for<R: Rng>(
    rng: &mut R,
    profile: BehaviorProfile,
    width: u32,
    height: u32,
) -> BehaviorPlan {
    let (mouse_passes, scroll_segments) = match profile {
        BehaviorProfile::Minimal => (0, 1),
        BehaviorProfile::Default => (1, 2),
        BehaviorProfile::Aggressive => (2, 4),
    };

    let mut steps = Vec::new();
    for _ in 0..mouse_passes {
        steps.extend(mouse_path(rng, width, height));
    }
    steps.extend(scroll_plan(rng, scroll_segments));
    BehaviorPlan { steps }
}

/// Render a plan as a self-contained async script the engine evaluates
/// after navigation. Pointer moves dispatch synthetic events; scrolls use
/// the real scroll APIs so lazy-loaded content is triggered.
pub fn render_script(plan: &BehaviorPlan) -> String {
    let mut ops = String::new();
    for step in &plan.steps {
        match step {
            BehaviorStep::MouseMove { x, y, delay_ms } => {
                ops.push_str(&format!(
                    "await pause({delay_ms}); moveTo({x:.1}, {y:.1});\n"
                ));
            }
            BehaviorStep::ScrollBy { dy, pause_ms } => {
                ops.push_str(&format!(
                    "window.scrollBy(0, {dy}); await pause({pause_ms});\n"
                ));
            }
        }
    }

    format!(
        r#"
(async () => {{
    const pause = (ms) => new Promise((resolve) => setTimeout(resolve, ms));
    const moveTo = (x, y) => {{
        try {{
            document.dispatchEvent(new PointerEvent('pointermove', {{
                clientX: x, clientY: y, bubbles: true
            }}));
        }} catch (e) {{}}
    }};
    try {{
{ops}
    }} catch (e) {{}}
}})();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mouse_path_stays_in_viewport() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            for step in mouse_path(&mut rng, 1280, 720) {
                if let BehaviorStep::MouseMove { x, y, delay_ms } = step {
                    assert!((0.0..=1280.0).contains(&x));
                    assert!((0.0..=720.0).contains(&y));
                    assert!((8..40).contains(&(delay_ms as i64)));
                }
            }
        }
    }

    #[test]
    fn test_mouse_path_is_not_a_straight_line() {
        let mut rng = StdRng::seed_from_u64(3);
        let steps = mouse_path(&mut rng, 1920, 1080);
        let points: Vec<(f64, f64)> = steps
            .iter()
            .filter_map(|s| match s {
                BehaviorStep::MouseMove { x, y, .. } => Some((*x, *y)),
                _ => None,
            })
            .collect();
        assert!(points.len() >= 8);

        // Collinearity check: at least one interior point deviates from
        // the straight segment between the endpoints.
        let (x0, y0) = points[0];
        let (x1, y1) = *points.last().unwrap();
        let deviates = points[1..points.len() - 1].iter().any(|(x, y)| {
            let cross = (x1 - x0) * (y - y0) - (y1 - y0) * (x - x0);
            cross.abs() > 1.0
        });
        assert!(deviates);
    }

    #[test]
    fn test_scroll_plan_pauses_are_reading_like() {
        let mut rng = StdRng::seed_from_u64(11);
        let steps = scroll_plan(&mut rng, 3);
        assert!(steps.len() >= 3);
        for step in &steps {
            if let BehaviorStep::ScrollBy { dy, pause_ms } = step {
                if *dy > 0 {
                    assert!((300..=800).contains(dy));
                    assert!((500..=1500).contains(pause_ms));
                } else {
                    assert!((-150..=-50).contains(dy));
                }
            }
        }
    }

    #[test]
    fn test_typing_delays_have_variance() {
        let mut rng = StdRng::seed_from_u64(5);
        let delays = typing_delays(&mut rng, 200);
        assert_eq!(delays.len(), 200);
        let min = delays.iter().min().unwrap();
        let max = delays.iter().max().unwrap();
        assert!(min < max);
        assert!(*min >= 50);
        assert!(*max <= 800);
    }

    #[test]
    fn test_plan_scales_with_profile() {
        let mut rng = StdRng::seed_from_u64(9);
        let minimal = plan_for(&mut rng, BehaviorProfile::Minimal, 1280, 720);
        let aggressive = plan_for(&mut rng, BehaviorProfile::Aggressive, 1280, 720);
        assert!(aggressive.steps.len() > minimal.steps.len());
    }

    #[test]
    fn test_render_script_contains_all_steps() {
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_for(&mut rng, BehaviorProfile::Default, 1280, 720);
        let script = render_script(&plan);
        assert!(script.contains("scrollBy"));
        assert!(script.contains("pointermove"));
        assert_eq!(script.matches("window.scrollBy").count(), plan
            .steps
            .iter()
            .filter(|s| matches!(s, BehaviorStep::ScrollBy { .. }))
            .count());
    }
}
