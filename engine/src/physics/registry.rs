//! Backend registry
//!
//! Backends register a factory under a name and a priority. [`PhysicsRegistry::select`]
//! tries them from the highest priority down and keeps the first one that is
//! available and sets up cleanly. [`NullPhysics`] sits at the bottom and always
//! succeeds, so an engine without any physics library still runs.
//!
//! # Example
//!
//! ```ignore
//! let registry = PhysicsRegistry::with_defaults();
//! let mut physics = registry.select(&config)?;
//! info!("Using {} physics", physics.engine_name());
//! ```

use tracing::{info, warn};

use super::bullet::Bullet;
use super::config::PhysicsConfig;
use super::error::PhysicsError;
use super::interface::{InterfaceState, PhysicsInterface};
use super::physx::PhysX;

/// Builds an unconfigured backend.
pub type PhysicsFactory = fn(&PhysicsConfig) -> Box<dyn PhysicsInterface>;

struct Entry {
    name: &'static str,
    priority: i32,
    factory: PhysicsFactory,
}

/// Backends ordered by descending priority.
#[derive(Default)]
pub struct PhysicsRegistry {
    entries: Vec<Entry>,
}

impl PhysicsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bullet (100), PhysX (50) and the null backend (0).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("Bullet", 100, |config| Box::new(Bullet::new(config)));
        registry.register("PhysX", 50, |config| Box::new(PhysX::new(config)));
        registry.register("None", 0, |config| Box::new(NullPhysics::new(config)));
        registry
    }

    /// Adds a backend. Backends of equal priority keep their registration order.
    pub fn register(&mut self, name: &'static str, priority: i32, factory: PhysicsFactory) {
        let index = self.entries.partition_point(|entry| entry.priority >= priority);
        self.entries.insert(
            index,
            Entry {
                name,
                priority,
                factory,
            },
        );
    }

    /// Registered names, highest priority first.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.name).collect()
    }

    /// Returns the first backend that is available and sets up.
    pub fn select(&self, config: &PhysicsConfig) -> Result<Box<dyn PhysicsInterface>, PhysicsError> {
        for entry in &self.entries {
            let mut backend = (entry.factory)(config);
            if !backend.is_available() {
                warn!(backend = entry.name, "Physics backend is not available");
                continue;
            }
            match backend.setup() {
                Ok(()) => {
                    info!(backend = entry.name, priority = entry.priority, "Selected physics backend");
                    return Ok(backend);
                }
                Err(error) => warn!(backend = entry.name, "Physics backend setup failed: {error}"),
            }
        }
        Err(PhysicsError::NoBackend)
    }
}

/// Backend that simulates nothing: every query fails and nothing can be created.
#[derive(Debug, Clone, Default)]
pub struct NullPhysics {
    state: InterfaceState,
}

impl NullPhysics {
    pub fn new(config: &PhysicsConfig) -> Self {
        Self {
            state: InterfaceState::new(config),
        }
    }
}

impl PhysicsInterface for NullPhysics {
    fn state(&self) -> &InterfaceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InterfaceState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::config::PhysXLinkage;
    use crate::physics::types::{Aabb, Ray, SimpleTransform, Vec3};

    struct Unavailable(InterfaceState);

    impl PhysicsInterface for Unavailable {
        fn state(&self) -> &InterfaceState {
            &self.0
        }

        fn state_mut(&mut self) -> &mut InterfaceState {
            &mut self.0
        }

        fn is_available(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_default_order() {
        assert_eq!(PhysicsRegistry::with_defaults().names(), vec!["Bullet", "PhysX", "None"]);
    }

    #[test]
    fn test_register_keeps_priority_order() {
        let mut registry = PhysicsRegistry::with_defaults();
        registry.register("Custom", 75, |config| Box::new(NullPhysics::new(config)));
        registry.register("Late", 100, |config| Box::new(NullPhysics::new(config)));
        assert_eq!(registry.names(), vec!["Bullet", "Late", "Custom", "PhysX", "None"]);
    }

    #[test]
    fn test_select_highest_priority() {
        let physics = PhysicsRegistry::with_defaults().select(&PhysicsConfig::default()).unwrap();
        assert_eq!(physics.engine_name(), "Bullet");
    }

    #[test]
    fn test_select_skips_unavailable() {
        let mut registry = PhysicsRegistry::new();
        registry.register("Missing", 10, |config| Box::new(Unavailable(InterfaceState::new(config))));
        registry.register("PhysX", 5, |config| Box::new(PhysX::new(config)));

        let mut config = PhysicsConfig::default();
        config.physx.linkage = PhysXLinkage::Dynamic;
        config.physx.library_dir = Some("/nonexistent/physx".into());
        assert!(matches!(registry.select(&config), Err(PhysicsError::NoBackend)));

        registry.register("None", 0, |config| Box::new(NullPhysics::new(config)));
        assert_eq!(registry.select(&config).unwrap().engine_name(), "None");
    }

    #[test]
    fn test_null_physics_refuses_everything() {
        let mut null = NullPhysics::default();
        assert!(null.is_available());
        assert!(null.setup().is_ok());
        assert!(null
            .create_bounding_box_body(&Aabb::new(Vec3::ZERO, Vec3::ONE), 1.0, false, None, &SimpleTransform::IDENTITY)
            .is_none());
        assert!(null.raycast(&Ray::new(Vec3::ZERO, Vec3::X)).is_none());
        assert!(null.create_character_controller(1.0, 0.5, None).is_none());
        assert_eq!(null.update(1.0), 8);
        assert_eq!(null.engine_name(), "None");
    }
}
