/*! Streaming asset pipeline: textures and models.
 *
 * Both managers follow the same pattern. `load` returns an asset whose
 * wait group signals once loading completes or fails; internally the first
 * block read carries the headers, which derive a schedule of further block
 * reads; each completed payload is handed to an async copy command list
 * that uploads into the GPU resource.
 */

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications
)]

pub mod format;
pub mod io;
mod model;
mod texture;

pub use model::{ModelAsset, ModelAssetManager, ModelInfo};
pub use texture::{TextureAsset, TextureAssetManager};

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use ferrum_jobs::WaitGroup;

/// Load progress of an asset. Transitions only move forward, except that
/// `Failed` is reachable from any non-terminal state.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetLoadingStatus {
    Uninitialized = 0,
    HeaderLoaded = 1,
    /// Some mip chains of a texture are resident.
    HasLoadedMips = 2,
    /// Some LODs of a model are resident.
    HasLoadedLods = 3,
    CompletelyLoaded = 4,
    Failed = 5,
}

impl AssetLoadingStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::HeaderLoaded,
            2 => Self::HasLoadedMips,
            3 => Self::HasLoadedLods,
            4 => Self::CompletelyLoaded,
            5 => Self::Failed,
            _ => unreachable!("invalid asset status"),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CompletelyLoaded | Self::Failed)
    }

    /// Partial-residency rank used to enforce monotonic transitions; the
    /// mips/LoDs flavors share one rank.
    fn rank(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::HeaderLoaded => 1,
            Self::HasLoadedMips | Self::HasLoadedLods => 2,
            Self::CompletelyLoaded => 3,
            Self::Failed => 4,
        }
    }

    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        next.rank() >= self.rank()
    }
}

/// The status/wait-group pair shared by both asset flavors.
pub(crate) struct AssetState {
    status: AtomicU8,
    completion_signaled: AtomicBool,
    wait_group: Arc<WaitGroup>,
}

impl AssetState {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(AssetLoadingStatus::Uninitialized as u8),
            completion_signaled: AtomicBool::new(false),
            wait_group: WaitGroup::new(1),
        }
    }

    pub fn status(&self) -> AssetLoadingStatus {
        AssetLoadingStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn wait_group(&self) -> &Arc<WaitGroup> {
        &self.wait_group
    }

    pub fn advance(&self, next: AssetLoadingStatus) {
        debug_assert!(
            self.status().can_advance_to(next),
            "asset status may not regress: {:?} -> {next:?}",
            self.status()
        );
        self.status.store(next as u8, Ordering::Release);
    }

    /// Moves to a terminal status and signals completion exactly once,
    /// even when several in-flight reads fail together.
    pub fn finish(&self, status: AssetLoadingStatus) {
        debug_assert!(status.is_terminal());
        if self.completion_signaled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.status.store(status as u8, Ordering::Release);
        self.wait_group.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_regresses() {
        use AssetLoadingStatus as S;

        assert!(S::Uninitialized.can_advance_to(S::HeaderLoaded));
        assert!(S::HeaderLoaded.can_advance_to(S::HasLoadedMips));
        assert!(S::HasLoadedMips.can_advance_to(S::CompletelyLoaded));
        assert!(S::HasLoadedLods.can_advance_to(S::HasLoadedLods));

        assert!(!S::HasLoadedMips.can_advance_to(S::HeaderLoaded));
        assert!(!S::CompletelyLoaded.can_advance_to(S::Failed));
        assert!(!S::Failed.can_advance_to(S::HeaderLoaded));

        // Failed is reachable from every non-terminal state.
        assert!(S::Uninitialized.can_advance_to(S::Failed));
        assert!(S::HasLoadedLods.can_advance_to(S::Failed));
    }

    #[test]
    fn finish_signals_exactly_once() {
        let state = AssetState::new();
        assert!(!state.wait_group().is_signaled());

        state.finish(AssetLoadingStatus::Failed);
        state.finish(AssetLoadingStatus::Failed);
        assert!(state.wait_group().is_signaled());
        assert_eq!(state.status(), AssetLoadingStatus::Failed);
    }
}
