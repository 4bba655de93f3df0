//! Entity/component system (minimal ECS).
//!
//! This is a deliberately small ECS suitable for deterministic simulation and
//! snapshot replication. It is not archetype-based; instead it uses typed
//! component storages keyed by entity id. Storages are ordered maps so every
//! iteration visits entities in creation order.

use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, HashMap},
};

use serde::{Deserialize, Serialize};

/// Opaque entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

trait Storage: Any + Send + Sync {
    fn remove_entity(&mut self, entity: EntityId);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static + Send + Sync> Storage for BTreeMap<EntityId, T> {
    fn remove_entity(&mut self, entity: EntityId) {
        self.remove(&entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Simple world that can store typed components.
#[derive(Default)]
pub struct World {
    next_id: u64,
    storages: HashMap<TypeId, Box<dyn Storage>>,
}

impl World {
    /// Creates a new entity.
    pub fn spawn(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Removes every component of an entity.
    pub fn despawn(&mut self, entity: EntityId) {
        for storage in self.storages.values_mut() {
            storage.remove_entity(entity);
        }
    }

    /// Inserts/replaces a component for an entity.
    pub fn insert<T: 'static + Send + Sync>(&mut self, entity: EntityId, component: T) {
        if let Some(storage) = self.storage_mut::<T>() {
            storage.insert(entity, component);
            return;
        }
        let mut storage = BTreeMap::<EntityId, T>::new();
        storage.insert(entity, component);
        self.storages.insert(TypeId::of::<T>(), Box::new(storage));
    }

    /// Gets a component reference.
    pub fn get<T: 'static + Send + Sync>(&self, entity: EntityId) -> Option<&T> {
        self.storage::<T>().and_then(|storage| storage.get(&entity))
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storage_mut::<T>()
            .and_then(|storage| storage.get_mut(&entity))
    }

    /// Iterates entities with a given component, in id order.
    pub fn iter<T: 'static + Send + Sync>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.storage::<T>()
            .into_iter()
            .flat_map(|storage| storage.iter().map(|(k, v)| (*k, v)))
    }

    /// Mutably iterates entities with a given component, in id order.
    pub fn iter_mut<T: 'static + Send + Sync>(
        &mut self,
    ) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.storage_mut::<T>()
            .into_iter()
            .flat_map(|storage| storage.iter_mut().map(|(k, v)| (*k, v)))
    }

    /// Number of entities carrying a component type.
    pub fn count<T: 'static + Send + Sync>(&self) -> usize {
        self.storage::<T>().map_or(0, BTreeMap::len)
    }

    fn storage<T: 'static + Send + Sync>(&self) -> Option<&BTreeMap<EntityId, T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<BTreeMap<EntityId, T>>())
    }

    fn storage_mut<T: 'static + Send + Sync>(&mut self) -> Option<&mut BTreeMap<EntityId, T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<BTreeMap<EntityId, T>>())
    }
}

/// Common component: position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position(pub crate::math::Vec2);

/// Common component: velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Velocity(pub crate::math::Vec2);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    #[test]
    fn ecs_insert_and_get() {
        let mut world = World::default();
        let e = world.spawn();
        world.insert(e, Position(Vec2::new(1.0, 2.0)));
        assert_eq!(world.get::<Position>(e).unwrap().0.x, 1.0);
    }

    #[test]
    fn despawn_removes_all_components() {
        let mut world = World::default();
        let a = world.spawn();
        let b = world.spawn();
        world.insert(a, Position(Vec2::ZERO));
        world.insert(a, Velocity(Vec2::new(1.0, 0.0)));
        world.insert(b, Position(Vec2::ZERO));

        world.despawn(a);

        assert!(world.get::<Position>(a).is_none());
        assert!(world.get::<Velocity>(a).is_none());
        assert_eq!(world.count::<Position>(), 1);
    }

    #[test]
    fn iteration_follows_spawn_order() {
        let mut world = World::default();
        let ids: Vec<_> = (0..5).map(|_| world.spawn()).collect();
        for id in ids.iter().rev() {
            world.insert(*id, Position(Vec2::ZERO));
        }
        let seen: Vec<_> = world.iter::<Position>().map(|(id, _)| id).collect();
        assert_eq!(seen, ids);
    }
}
