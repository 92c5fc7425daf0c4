//! Visual-effects core for a compositing window manager: cached backdrop
//! blur, soft window shadows, and opacity fade animation.
//!
//! The crate is frame-synchronous and GPU-agnostic. A driver (the
//! compositor's paint loop) owns an [`Effects`] value parameterized over a
//! [`GpuDevice`] implementation, feeds it window lifecycle and geometry
//! changes, ticks the fade animator once per frame, and asks it to refresh
//! blur caches and regenerate shadows before compositing. All effect caches
//! are damage-driven: GPU work only happens for windows whose cached
//! results went stale since the last frame.
//!
//! Blurring uses the dual-Kawase scheme (progressive downsample then
//! upsample), shadows are built from stencil-clipped blurred silhouettes,
//! and fades share one cubic-bezier easing curve with per-window keyframe
//! queues.

pub mod bezier;
pub mod blur;
pub mod config;
pub mod engine;
pub mod fade;
pub mod geometry;
pub mod gpu;
pub mod mock;
pub mod shadow;
pub mod window;

pub use bezier::Bezier;
pub use blur::{BackdropQuad, BackdropSource, BlurCache, BlurPipeline};
pub use config::EffectsConfig;
pub use engine::{Effects, FadeEvent};
pub use fade::{FADE_QUEUE_CAP, FadeAction, FadeQueue, FadeTick};
pub use geometry::{Rect, Size};
pub use gpu::{
    DrawQuad, EffectError, FramebufferId, GpuDevice, RenderToggles, RenderbufferId, ShaderKind,
    ShaderProgram, StencilMode, TextureId, ToggleGuard, Uniform, UniformValue,
};
pub use shadow::{SHADOW_BORDER, ShadowCache, ShadowJob, ShadowPipeline};
pub use window::{WindowArena, WindowEffects, WindowHandle, WindowStatus};
