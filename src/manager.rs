use std::{cell::Cell, num::NonZeroU64, rc::Rc};

use serde::Serialize;

use crate::{
    config::VboConfig,
    error::VboError,
    resource::{BufferResource, BufferTarget, UsageHint},
    vbo::Vbo,
};

/// Aggregate counters over every [Vbo] created by a [VboManager].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub peak_instance_count: usize,
    pub current_instance_count: usize,
    pub current_total_bytes: u64,
    pub peak_total_bytes: u64,
}

/// Shared view of a manager's [ManagerStats], held by each [Vbo] it created so growth and drops
/// are accounted for.
#[derive(Debug, Clone)]
pub(crate) struct UsageTracker(Rc<Cell<ManagerStats>>);

impl UsageTracker {
    fn update(&self, f: impl FnOnce(&mut ManagerStats)) {
        let mut stats = self.0.get();
        f(&mut stats);
        stats.peak_total_bytes = stats.peak_total_bytes.max(stats.current_total_bytes);
        self.0.set(stats);
    }

    fn register(&self, bytes: u64) {
        self.update(|stats| {
            stats.current_instance_count += 1;
            stats.peak_instance_count = stats
                .peak_instance_count
                .max(stats.current_instance_count);
            stats.current_total_bytes += bytes;
        })
    }

    pub(crate) fn grow(&self, delta: u64) {
        self.update(|stats| {
            stats.current_total_bytes = stats.current_total_bytes.saturating_add(delta)
        })
    }

    pub(crate) fn release(&self, bytes: u64) {
        self.update(|stats| {
            stats.current_instance_count -= 1;
            stats.current_total_bytes -= bytes;
        })
    }
}

/// Creates [Vbo]s and keeps count of them.
///
/// The manager owns none of the buffers it creates; it only observes them for diagnostics.
#[derive(Debug)]
pub struct VboManager {
    config: VboConfig,
    stats: UsageTracker,
}

impl Default for VboManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VboManager {
    pub fn new() -> Self {
        VboManager {
            config: VboConfig::default(),
            stats: UsageTracker(Default::default()),
        }
    }

    pub fn with_config(config: VboConfig) -> Result<Self, VboError> {
        config.validate()?;
        Ok(VboManager {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &VboConfig {
        &self.config
    }

    /// Creates an inactive [Vbo] of `capacity` bytes.
    pub fn allocate_vbo(
        &mut self,
        target: BufferTarget,
        capacity: NonZeroU64,
        usage: UsageHint,
    ) -> Vbo {
        self.stats.register(capacity.get());
        log::debug!(
            "[VboManager]: new {:?} vbo of {} bytes ({:?})",
            target,
            capacity,
            usage
        );
        Vbo::from_parts(
            target,
            capacity,
            usage,
            self.config,
            Some(self.stats.clone()),
        )
    }

    /// Creates an inactive [Vbo] using the configured initial capacity and usage.
    pub fn allocate_default_vbo(&mut self, target: BufferTarget) -> Vbo {
        self.allocate_vbo(
            target,
            self.config.initial_capacity(),
            self.config.usage,
        )
    }

    /// Releases the native resource of `vbo` and stops counting it.
    pub fn destroy_vbo(
        &mut self,
        device: &mut impl BufferResource,
        vbo: Vbo,
    ) -> Result<(), VboError> {
        vbo.destroy(device)
    }

    pub fn peak_instance_count(&self) -> usize {
        self.stats().peak_instance_count
    }

    pub fn current_instance_count(&self) -> usize {
        self.stats().current_instance_count
    }

    pub fn current_total_bytes(&self) -> u64 {
        self.stats().current_total_bytes
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats.0.get()
    }
}

#[cfg(test)]
mod test {
    use nonzero_ext::nonzero;

    use super::{ManagerStats, VboManager};
    use crate::{
        config::VboConfig,
        host::HostDevice,
        resource::{BufferTarget, UsageHint},
    };

    #[test]
    fn counts_instances() {
        let mut device = HostDevice::new();
        let mut manager = VboManager::new();

        let vertices = manager.allocate_vbo(
            BufferTarget::Vertex,
            nonzero!(1024u64),
            UsageHint::DynamicDraw,
        );
        let indices =
            manager.allocate_vbo(BufferTarget::Index, nonzero!(256u64), UsageHint::StaticDraw);
        assert_eq!(manager.current_instance_count(), 2);
        assert_eq!(manager.peak_instance_count(), 2);
        assert_eq!(manager.current_total_bytes(), 1280);
        assert_eq!(indices.usage(), UsageHint::StaticDraw);

        manager.destroy_vbo(&mut device, vertices).unwrap();
        assert_eq!(
            manager.stats(),
            ManagerStats {
                peak_instance_count: 2,
                current_instance_count: 1,
                current_total_bytes: 256,
                peak_total_bytes: 1280,
            }
        );

        drop(indices);
        assert_eq!(manager.current_instance_count(), 0);
        assert_eq!(manager.current_total_bytes(), 0);
        assert_eq!(manager.peak_instance_count(), 2);
    }

    #[test]
    fn tracks_growth() {
        let mut device = HostDevice::new();
        let mut manager = VboManager::new();
        let mut vbo =
            manager.allocate_vbo(BufferTarget::Vertex, nonzero!(100u64), UsageHint::DynamicDraw);

        vbo.activate(&mut device).unwrap();
        vbo.allocate_block(&mut device, nonzero!(100u64)).unwrap();
        vbo.allocate_block(&mut device, nonzero!(50u64)).unwrap();
        assert_eq!(vbo.capacity(), 150);
        assert_eq!(manager.current_total_bytes(), 150);

        manager.destroy_vbo(&mut device, vbo).unwrap();
        assert_eq!(manager.current_total_bytes(), 0);
        assert_eq!(manager.stats().peak_total_bytes, 150);
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn default_vbo_uses_config() {
        let config = VboConfig {
            initial_capacity: 4096,
            usage: UsageHint::StreamDraw,
            ..Default::default()
        };
        let mut manager = VboManager::with_config(config).unwrap();
        let vbo = manager.allocate_default_vbo(BufferTarget::Index);
        assert_eq!(vbo.capacity(), 4096);
        assert_eq!(vbo.usage(), UsageHint::StreamDraw);
        assert_eq!(vbo.target(), BufferTarget::Index);
    }
}
