//! Pool of mirror proxies standing in for the far-side half of straddling bodies.

use bevy::{prelude::*, utils::HashMap};

use super::{
    proxy::{ProxyKind, ProxyShape},
    traveler::BodyState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GhostRole {
    /// Mirror of a collider crossing a portal.
    Collider,
    /// Mirror of the rigid body owning crossing colliders.
    Body,
    /// Mirror of a collider merely near a portal.
    Obstacle,
}

/// Identity of a ghost: what it mirrors and which portal it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GhostKey {
    pub source: Entity,
    pub portal: Entity,
    pub role: GhostRole,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GhostData {
    Collider {
        shape: ProxyShape,
        /// World pose, mirrored through the transfer.
        transform: Transform,
        kind: ProxyKind,
        /// Mirror body entity the collider hangs from.
        body: Option<Entity>,
        /// Pose relative to `body`.
        local: Transform,
        /// Share of the mirror body's mass carried by this collider.
        mass: Option<f32>,
    },
    Body(BodyState),
}

#[derive(Debug, Clone)]
pub struct GhostSlot {
    pub key: GhostKey,
    pub entity: Entity,
    pub data: GhostData,
    pub last_touched_tick: u64,
    pub last_touched_secs: f32,
    /// Cleared when the ghost was not refreshed by the latest tick.
    pub active: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub deactivated: usize,
    pub released: usize,
}

#[derive(Debug)]
pub struct GhostPool {
    slots: Vec<Option<GhostSlot>>,
    free: Vec<usize>,
    index: HashMap<GhostKey, usize>,
    capacity: usize,
    created: Vec<Entity>,
    released: Vec<Entity>,
}

impl GhostPool {
    pub fn new(capacity: usize) -> GhostPool {
        GhostPool {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::default(),
            capacity,
            created: Vec::new(),
            released: Vec::new(),
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Refresh the ghost for `key`, creating it with a fresh entity from `allocate` if needed.
    ///
    /// Returns `None` when the pool is full, in which case the ghost is skipped for this tick.
    pub fn touch<F: FnMut() -> Entity>(
        &mut self,
        key: GhostKey,
        data: GhostData,
        tick: u64,
        now_secs: f32,
        allocate: &mut F,
    ) -> Option<Entity> {
        if let Some(slot) = self
            .index
            .get(&key)
            .and_then(|&index| self.slots.get_mut(index))
            .and_then(Option::as_mut)
        {
            slot.data = data;
            slot.last_touched_tick = tick;
            slot.last_touched_secs = now_secs;
            slot.active = true;
            return Some(slot.entity);
        }

        if self.len() >= self.capacity {
            return None;
        }

        let entity = allocate();
        let slot = GhostSlot {
            key,
            entity,
            data,
            last_touched_tick: tick,
            last_touched_secs: now_secs,
            active: true,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, index);
        self.created.push(entity);
        Some(entity)
    }

    /// Deactivate ghosts not refreshed during `tick` and release the ones idle for longer than
    /// `expiration_secs`.
    pub fn sweep(&mut self, tick: u64, now_secs: f32, expiration_secs: f32) -> SweepStats {
        let mut stats = SweepStats::default();
        for (index, entry) in self.slots.iter_mut().enumerate() {
            let expired = match entry {
                Some(slot) if slot.last_touched_tick != tick => {
                    if slot.active {
                        slot.active = false;
                        stats.deactivated += 1;
                    }
                    now_secs - slot.last_touched_secs >= expiration_secs
                }
                _ => false,
            };
            if expired {
                if let Some(slot) = entry.take() {
                    self.index.remove(&slot.key);
                    self.released.push(slot.entity);
                    self.free.push(index);
                    stats.released += 1;
                }
            }
        }
        stats
    }

    pub fn get(&self, key: &GhostKey) -> Option<&GhostSlot> {
        self.index
            .get(key)
            .and_then(|&index| self.slots.get(index))
            .and_then(Option::as_ref)
    }

    /// Slot owning the ghost entity `entity`.
    pub fn find_entity(&self, entity: Entity) -> Option<&GhostSlot> {
        self.iter().find(|slot| slot.entity == entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GhostSlot> {
        self.slots.iter().flatten()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &GhostSlot> {
        self.iter().filter(|slot| slot.active)
    }

    /// Number of live slots, active or idle.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entities allocated since the last call.
    pub fn drain_created(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.created)
    }

    /// Entities returned to the pool since the last call, to be despawned.
    pub fn drain_released(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(source: u32) -> GhostKey {
        GhostKey {
            source: Entity::from_raw(source),
            portal: Entity::from_raw(100),
            role: GhostRole::Collider,
        }
    }

    fn data() -> GhostData {
        GhostData::Collider {
            shape: ProxyShape::Ball { radius: 0.5 },
            transform: Transform::IDENTITY,
            kind: ProxyKind::Ghost {
                source: Entity::from_raw(1),
                attached_portal: Entity::from_raw(100),
            },
            body: None,
            local: Transform::IDENTITY,
            mass: None,
        }
    }

    fn allocator() -> impl FnMut() -> Entity {
        let mut next = 1000;
        move || {
            next += 1;
            Entity::from_raw(next)
        }
    }

    #[test]
    fn refreshing_reuses_the_entity() {
        let mut pool = GhostPool::new(8);
        let mut alloc = allocator();
        let first = pool.touch(key(1), data(), 1, 0., &mut alloc);
        let second = pool.touch(key(1), data(), 2, 0.1, &mut alloc);
        assert_eq!(first, second);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.drain_created().len(), 1);
        assert_eq!(pool.find_entity(first.unwrap()).map(|slot| slot.key), Some(key(1)));
        assert!(pool.find_entity(Entity::from_raw(7)).is_none());
    }

    #[test]
    fn ghosts_expire_after_idle_window() {
        let mut pool = GhostPool::new(8);
        let mut alloc = allocator();
        let ghost = pool.touch(key(1), data(), 1, 0., &mut alloc).unwrap();

        let stats = pool.sweep(2, 5., 10.);
        assert_eq!(stats, SweepStats { deactivated: 1, released: 0 });
        assert_eq!(pool.iter_active().count(), 0);
        assert!(pool.get(&key(1)).is_some());

        let stats = pool.sweep(3, 10., 10.);
        assert_eq!(stats.released, 1);
        assert!(pool.get(&key(1)).is_none());
        assert_eq!(pool.drain_released(), vec![ghost]);
    }

    #[test]
    fn refreshed_ghosts_survive_the_sweep() {
        let mut pool = GhostPool::new(8);
        let mut alloc = allocator();
        pool.touch(key(1), data(), 1, 0., &mut alloc);
        pool.touch(key(1), data(), 2, 20., &mut alloc);
        let stats = pool.sweep(2, 20., 10.);
        assert_eq!(stats, SweepStats::default());
        assert_eq!(pool.iter_active().count(), 1);
    }

    #[test]
    fn full_pool_skips_new_ghosts_and_recycles_slots() {
        let mut pool = GhostPool::new(1);
        let mut alloc = allocator();
        assert!(pool.touch(key(1), data(), 1, 0., &mut alloc).is_some());
        assert!(pool.touch(key(2), data(), 1, 0., &mut alloc).is_none());
        pool.sweep(2, 100., 10.);
        assert!(pool.touch(key(2), data(), 3, 100., &mut alloc).is_some());
        assert_eq!(pool.iter().count(), 1);
    }
}
