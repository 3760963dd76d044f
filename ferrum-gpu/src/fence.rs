use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::device::DeviceShared;
use crate::DeviceError;

/// A timeline semaphore, used 1:1 as the engine's fence primitive.
///
/// Values are unsigned 64-bit and only ever increase; there is no wrap
/// handling because a value per submission outlives any realistic process.
pub struct Fence {
    shared: Arc<DeviceShared>,
    raw: vk::Semaphore,
    /// The largest value passed to a signal operation so far.
    last_pending: AtomicU64,
}

impl Fence {
    pub(crate) fn new(shared: Arc<DeviceShared>, initial_value: u64) -> Result<Self, DeviceError> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        let raw = unsafe { shared.raw.create_semaphore(&create_info, None)? };
        Ok(Self {
            shared,
            raw,
            last_pending: AtomicU64::new(initial_value),
        })
    }

    pub(crate) fn raw(&self) -> vk::Semaphore {
        self.raw
    }

    /// The value the GPU has completed.
    pub fn completed_value(&self) -> Result<u64, DeviceError> {
        Ok(unsafe { self.shared.raw.get_semaphore_counter_value(self.raw)? })
    }

    /// The largest value a submission will eventually signal.
    pub fn pending_value(&self) -> u64 {
        self.last_pending.load(Ordering::Acquire)
    }

    pub(crate) fn note_pending(&self, value: u64) {
        self.last_pending.fetch_max(value, Ordering::AcqRel);
    }

    /// Signals `value` from the host.
    pub fn signal(&self, value: u64) -> Result<(), DeviceError> {
        self.note_pending(value);
        let signal_info = vk::SemaphoreSignalInfo::builder()
            .semaphore(self.raw)
            .value(value);
        unsafe { self.shared.raw.signal_semaphore(&signal_info)? };
        Ok(())
    }

    /// Blocks until the fence reaches `value`. There is no timeout; waiting
    /// on a value that is never submitted deadlocks by contract.
    pub fn wait(&self, value: u64) -> Result<(), DeviceError> {
        profiling::scope!("Fence::wait");
        let semaphores = [self.raw];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.shared.raw.wait_semaphores(&wait_info, u64::MAX)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.shared.raw.destroy_semaphore(self.raw, None) };
    }
}

/// A `(fence, value)` pair: the unit of GPU-side progress everything is
/// retired against.
#[derive(Clone)]
pub struct FenceSyncPoint {
    pub fence: Arc<Fence>,
    pub value: u64,
}

impl FenceSyncPoint {
    pub fn new(fence: Arc<Fence>, value: u64) -> Self {
        Self { fence, value }
    }

    /// Whether the GPU has advanced past this point.
    pub fn is_reached(&self) -> bool {
        self.fence
            .completed_value()
            .map(|completed| completed >= self.value)
            .unwrap_or(false)
    }

    pub fn wait(&self) -> Result<(), DeviceError> {
        self.fence.wait(self.value)
    }
}
