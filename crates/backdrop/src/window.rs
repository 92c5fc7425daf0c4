//! Per-window effect state and the window arena.
//!
//! Windows live in a generational arena and are addressed by stable
//! [`WindowHandle`]s. A destroyed window's slot is recycled with a bumped
//! generation, so handles held elsewhere (paint order, transform links,
//! driver bookkeeping) simply stop resolving instead of dangling; there is
//! no global sweep to null out references on removal.

use crate::blur::BlurCache;
use crate::fade::{FadeAction, FadeQueue};
use crate::geometry::Rect;
use crate::shadow::ShadowCache;

/// Stable handle into the [`WindowArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle {
    index: u32,
    generation: u32,
}

/// Lifecycle state of a window, advanced when its fade drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowStatus {
    /// Fading in towards focus.
    Activating,
    /// Focused and settled.
    Active,
    /// Fading towards its unfocused opacity.
    Deactivating,
    /// Unfocused and settled.
    #[default]
    Inactive,
    /// Fading out before unmapping.
    Hiding,
    /// Unmapped; contents released.
    Invisible,
    /// Fading out before destruction.
    Destroying,
    /// Fully destroyed; awaiting reap by the driver.
    Destroyed,
}

impl WindowStatus {
    /// Whether the window contributes pixels this frame.
    #[must_use]
    pub const fn viewable(self) -> bool {
        matches!(
            self,
            Self::Activating
                | Self::Active
                | Self::Deactivating
                | Self::Inactive
                | Self::Hiding
                | Self::Destroying
        )
    }

    /// The settled state reached when a fade in this state drains.
    #[must_use]
    pub const fn settled(self) -> Self {
        match self {
            Self::Activating => Self::Active,
            Self::Deactivating => Self::Inactive,
            Self::Hiding => Self::Invisible,
            Self::Destroying => Self::Destroyed,
            other => other,
        }
    }
}

/// Everything the effects core tracks for one window.
#[derive(Debug)]
pub struct WindowEffects {
    /// Screen-space geometry, written by the driver.
    pub rect: Rect,
    pub status: WindowStatus,
    /// Window wants its backdrop blurred.
    pub blur_background: bool,
    /// Window casts a shadow.
    pub has_shadow: bool,
    /// Window is fully opaque (blur may be skipped unless frames are
    /// blurred too).
    pub solid: bool,
    pub(crate) blur: BlurCache,
    pub(crate) shadow: ShadowCache,
    pub(crate) fade: FadeQueue,
    pub(crate) pending_action: Option<FadeAction>,
    pub(crate) shadow_damaged: bool,
}

impl WindowEffects {
    /// Fresh state for a newly tracked window.
    #[must_use]
    pub fn new(rect: Rect, blur_background: bool, has_shadow: bool) -> Self {
        Self {
            rect,
            status: WindowStatus::Inactive,
            blur_background,
            has_shadow,
            solid: false,
            blur: BlurCache::new(),
            shadow: ShadowCache::new(),
            fade: FadeQueue::new(0.0),
            pending_action: None,
            shadow_damaged: has_shadow,
        }
    }

    /// Displayed opacity in percent.
    #[inline]
    #[must_use]
    pub fn opacity(&self) -> f64 {
        self.fade.value()
    }

    /// Whether the cached backdrop blur is stale.
    #[inline]
    #[must_use]
    pub const fn blur_damaged(&self) -> bool {
        self.blur.damaged
    }

    /// Mark the cached backdrop blur stale.
    #[inline]
    pub const fn damage_blur(&mut self) {
        self.blur.damaged = true;
    }
}

struct Slot {
    generation: u32,
    entry: Option<WindowEffects>,
}

/// Generational arena of windows.
#[derive(Default)]
pub struct WindowArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl WindowArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live windows.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena holds no windows.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a window, reusing a freed slot when one exists.
    pub fn insert(&mut self, window: WindowEffects) -> WindowHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(window);
            return WindowHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(window),
        });
        WindowHandle {
            index,
            generation: 0,
        }
    }

    /// Remove a window, returning its state. Stale handles return `None`.
    pub fn remove(&mut self, handle: WindowHandle) -> Option<WindowEffects> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(entry)
    }

    /// Resolve a handle, validating its generation.
    #[must_use]
    pub fn get(&self, handle: WindowHandle) -> Option<&WindowEffects> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Resolve a handle mutably, validating its generation.
    pub fn get_mut(&mut self, handle: WindowHandle) -> Option<&mut WindowEffects> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Whether a handle still resolves to a live window.
    #[must_use]
    pub fn contains(&self, handle: WindowHandle) -> bool {
        self.get(handle).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> WindowEffects {
        WindowEffects::new(Rect::new(0.0, 0.0, 100.0, 100.0), true, true)
    }

    #[test]
    fn stale_handles_stop_resolving() {
        let mut arena = WindowArena::new();
        let first = arena.insert(window());
        assert!(arena.contains(first));

        assert!(arena.remove(first).is_some());
        assert!(!arena.contains(first));
        assert!(arena.remove(first).is_none());

        // Slot reuse must not resurrect the old handle.
        let second = arena.insert(window());
        assert!(!arena.contains(first));
        assert!(arena.contains(second));
        assert_ne!(first, second);
    }

    #[test]
    fn len_tracks_inserts_and_removes() {
        let mut arena = WindowArena::new();
        assert!(arena.is_empty());
        let a = arena.insert(window());
        let b = arena.insert(window());
        assert_eq!(arena.len(), 2);
        arena.remove(a);
        assert_eq!(arena.len(), 1);
        assert!(arena.get(b).is_some());
    }

    #[test]
    fn status_settles_through_the_state_machine() {
        assert_eq!(WindowStatus::Activating.settled(), WindowStatus::Active);
        assert_eq!(WindowStatus::Deactivating.settled(), WindowStatus::Inactive);
        assert_eq!(WindowStatus::Hiding.settled(), WindowStatus::Invisible);
        assert_eq!(WindowStatus::Destroying.settled(), WindowStatus::Destroyed);
        assert_eq!(WindowStatus::Active.settled(), WindowStatus::Active);
        assert!(WindowStatus::Hiding.viewable());
        assert!(!WindowStatus::Invisible.viewable());
    }
}
