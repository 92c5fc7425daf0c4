//! Opacity fade animation.
//!
//! Each window carries a [`FadeQueue`]: a fixed-capacity ring of
//! [`Keyframe`]s plus the continuously updated displayed opacity. The
//! driver ticks every queue once per frame with the frame delta; keyframes
//! drain in order, easing through the shared bezier curve. Opacity is kept
//! on the 0–100 percent scale the window shader consumes.
//!
//! Completion is data, not code: a window registers a [`FadeAction`] and
//! the engine emits it as an event when the queue drains, so no callback
//! pointers live inside animation state.

use crate::bezier::{Bezier, lerp};

/// Ring capacity. Opacity changes are rare (show/hide/focus), so a short
/// bounded history also bounds worst-case animation lag.
pub const FADE_QUEUE_CAP: usize = 4;

/// One segment of an opacity transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct Keyframe {
    /// Target opacity in percent (0–100).
    pub target: f64,
    /// Segment length in seconds; `<= 0` means immediate.
    pub duration: f64,
    /// Accumulated time.
    pub elapsed: f64,
    /// Skip time accumulation on the first tick after enqueueing, so a
    /// stale frame delta is not charged to a keyframe that was not yet
    /// current.
    pub ignore_next_tick: bool,
}

/// What a tick did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FadeTick {
    /// The displayed value moved this tick.
    pub value_changed: bool,
    /// The queue fully drained this tick (exactly once per fade).
    pub completed: bool,
}

/// Driver-interpreted completion action attached to a fade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeAction {
    /// Window finished fading in after being raised/focused.
    Activate,
    /// Window finished fading to its inactive opacity.
    Deactivate,
    /// Window finished fading out and can release its drawable.
    Hide,
    /// Window finished its death fade and can be reaped.
    Destroy,
}

/// Fixed-capacity keyframe ring with head/tail indices.
///
/// `head == tail` means no keyframe is in flight; otherwise exactly one
/// (the slot after `head`) advances each tick. Overflow drops the oldest
/// pending keyframe rather than growing. An immediate start leaves the ring
/// settled but holds one completion for the next tick to deliver.
#[derive(Debug, Clone)]
pub struct FadeQueue {
    keyframes: [Keyframe; FADE_QUEUE_CAP],
    head: usize,
    tail: usize,
    value: f64,
    /// An immediate `start` already moved the value; the next tick must
    /// still report it so completion handling runs exactly once.
    pending_snap: Option<FadeTick>,
}

impl FadeQueue {
    /// Create an idle queue resting at `initial` percent opacity.
    #[must_use]
    pub fn new(initial: f64) -> Self {
        let mut keyframes = [Keyframe::default(); FADE_QUEUE_CAP];
        keyframes[0].target = initial;
        Self {
            keyframes,
            head: 0,
            tail: 0,
            value: initial,
            pending_snap: None,
        }
    }

    /// Currently displayed opacity in percent.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Whether no fade is in progress and nothing is left to report.
    #[inline]
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.head == self.tail && self.pending_snap.is_none()
    }

    /// Begin a fade towards `target` percent over `duration` seconds.
    ///
    /// A zero duration snaps: the queue collapses to a single settled
    /// keyframe and the value changes immediately, skipping the animation
    /// path. The snap's completion is still delivered by the next tick.
    pub fn start(&mut self, target: f64, duration: f64) {
        if duration <= 0.0 {
            self.head = 0;
            self.tail = 0;
            self.keyframes[0] = Keyframe {
                target,
                duration: 0.0,
                elapsed: 0.0,
                ignore_next_tick: false,
            };
            self.pending_snap = Some(FadeTick {
                value_changed: (self.value - target).abs() > f64::EPSILON,
                completed: true,
            });
            self.value = target;
            return;
        }
        // The queue is live again; its eventual drain reports completion.
        self.pending_snap = None;

        let next = (self.tail + 1) % FADE_QUEUE_CAP;
        if next == self.head {
            log::warn!(
                target: "backdrop",
                "fade queue full, dropping oldest pending keyframe (target {:.0}%)",
                self.keyframes[(self.head + 1) % FADE_QUEUE_CAP].target,
            );
            self.head = (self.head + 1) % FADE_QUEUE_CAP;
        }
        self.keyframes[next] = Keyframe {
            target,
            duration,
            elapsed: 0.0,
            ignore_next_tick: true,
        };
        self.tail = next;
    }

    /// Advance the fade by `dt` seconds.
    ///
    /// Walks every pending keyframe from `head + 1` to `tail`: completed
    /// keyframes snap the value and advance the head (several can drain in
    /// one tick), the in-flight keyframe blends the value towards its
    /// target from wherever the value currently is, so a superseding
    /// keyframe redirects mid-flight instead of jumping.
    pub fn tick(&mut self, dt: f64, curve: &Bezier) -> FadeTick {
        if let Some(snap) = self.pending_snap.take() {
            return snap;
        }
        if self.is_idle() {
            return FadeTick::default();
        }

        let before = self.value;
        self.value = self.keyframes[self.head].target;

        let mut i = self.head;
        while i != self.tail {
            i = (i + 1) % FADE_QUEUE_CAP;
            let keyframe = &mut self.keyframes[i];
            if keyframe.ignore_next_tick {
                keyframe.ignore_next_tick = false;
            } else {
                keyframe.elapsed += dt;
            }

            let x = keyframe.elapsed / keyframe.duration;
            if x >= 1.0 {
                keyframe.elapsed = 0.0;
                self.head = i;
                self.value = keyframe.target;
            } else {
                let t = curve.ease(x);
                self.value = lerp(self.value, keyframe.target, t);
            }
        }

        FadeTick {
            value_changed: (self.value - before).abs() > f64::EPSILON,
            completed: self.is_idle(),
        }
    }

    #[cfg(test)]
    pub(crate) fn raw(&self) -> (&[Keyframe; FADE_QUEUE_CAP], usize, usize) {
        (&self.keyframes, self.head, self.tail)
    }
}
