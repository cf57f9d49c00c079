//! Reads the last known position from the host's location providers.

use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::LocationError;
use crate::model::{Coordinate, Fix};

/// Host location subsystem.
pub trait LocationPlatform: Send + Sync + Debug {
    fn has_permission(&self) -> bool;

    /// Enabled providers in registration order.
    fn enabled_providers(&self) -> Vec<String>;

    /// Cached reading for `provider`. Never triggers a new acquisition.
    fn last_known_fix(&self, provider: &str) -> Option<Fix>;
}

/// Read side of the pipeline: yields a coordinate or reports why it can't.
pub trait LocationSource: Send + Sync + Debug {
    fn last_known_position(&self) -> Result<Coordinate, LocationError>;
}

#[derive(Debug)]
pub struct LocationAdapter<P> {
    platform: P,
}

impl<P: LocationPlatform> LocationAdapter<P> {
    pub fn new(platform: P) -> Self {
        Self { platform }
    }
}

impl<P: LocationPlatform> LocationSource for LocationAdapter<P> {
    fn last_known_position(&self) -> Result<Coordinate, LocationError> {
        if !self.platform.has_permission() {
            return Err(LocationError::PermissionDenied);
        }

        // Last registered provider wins.
        self.platform
            .enabled_providers()
            .iter()
            .rev()
            .find_map(|provider| {
                let fix = self.platform.last_known_fix(provider)?;
                tracing::debug!(provider = %provider, ?fix, "using last known fix");
                Some(Coordinate::from_fix(fix))
            })
            .ok_or(LocationError::NoFix)
    }
}

#[derive(Debug, Clone)]
struct ProviderEntry {
    name: String,
    enabled: bool,
    fix: Option<Fix>,
}

/// In-memory platform whose providers and fixes are supplied up front.
#[derive(Debug, Default)]
pub struct StaticPlatform {
    providers: RwLock<Vec<ProviderEntry>>,
    permission: AtomicBool,
}

impl StaticPlatform {
    pub fn new(permission_granted: bool) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            permission: AtomicBool::new(permission_granted),
        }
    }

    /// Registers a provider, or replaces the fix of one with the same name.
    pub fn register(&self, name: impl Into<String>, fix: Option<Fix>) {
        let name = name.into();
        let mut providers = self.providers.write();

        match providers.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.fix = fix,
            None => providers.push(ProviderEntry { name, enabled: true, fix }),
        }
    }

    pub fn with_provider(self, name: impl Into<String>, fix: Option<Fix>) -> Self {
        self.register(name, fix);
        self
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        if let Some(p) = self.providers.write().iter_mut().find(|p| p.name == name) {
            p.enabled = enabled;
        }
    }

    pub fn grant(&self) {
        self.permission.store(true, Ordering::SeqCst);
    }
}

impl LocationPlatform for StaticPlatform {
    fn has_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn enabled_providers(&self) -> Vec<String> {
        self.providers
            .read()
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.name.clone())
            .collect()
    }

    fn last_known_fix(&self, provider: &str) -> Option<Fix> {
        self.providers
            .read()
            .iter()
            .find(|p| p.name == provider)
            .and_then(|p| p.fix)
    }
}

impl<T: LocationPlatform + ?Sized> LocationPlatform for std::sync::Arc<T> {
    fn has_permission(&self) -> bool {
        (**self).has_permission()
    }

    fn enabled_providers(&self) -> Vec<String> {
        (**self).enabled_providers()
    }

    fn last_known_fix(&self, provider: &str) -> Option<Fix> {
        (**self).last_known_fix(provider)
    }
}
