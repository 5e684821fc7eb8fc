//! Per-request context.
//!
//! Carries the caller's identity (user, per-service instance IDs and local
//! devices) and a typed value map for anything handlers want to hand down to
//! run functions.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{InstanceId, LocalDevices};

/// Context of one API request. Cheap to clone.
#[derive(Clone)]
pub struct RequestContext {
    request_id: Uuid,
    user: Option<String>,
    instance_ids: HashMap<String, InstanceId>,
    local_devices: HashMap<String, LocalDevices>,
    values: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user: None,
            instance_ids: HashMap::new(),
            local_devices: HashMap::new(),
            values: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Records the caller's instance ID for a service. Service names are
    /// case-insensitive.
    pub fn with_instance_id(mut self, service: &str, instance_id: InstanceId) -> Self {
        self.instance_ids
            .insert(service.to_ascii_lowercase(), instance_id);
        self
    }

    /// Records the devices present on the caller's instance for a service.
    pub fn with_local_devices(mut self, service: &str, devices: LocalDevices) -> Self {
        self.local_devices
            .insert(service.to_ascii_lowercase(), devices);
        self
    }

    /// Stores a typed value under `key`, replacing any previous value.
    pub fn with_value<T: Any + Send + Sync>(mut self, key: &'static str, value: T) -> Self {
        self.values.insert(key, Arc::new(value));
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn instance_id(&self, service: &str) -> Option<&InstanceId> {
        self.instance_ids.get(&service.to_ascii_lowercase())
    }

    /// Like [`instance_id`](Self::instance_id) but fails with
    /// [`Error::MissingInstanceId`].
    pub fn require_instance_id(&self, service: &str) -> Result<&InstanceId> {
        self.instance_id(service)
            .ok_or_else(|| Error::MissingInstanceId {
                service: service.to_string(),
            })
    }

    pub fn local_devices(&self, service: &str) -> Option<&LocalDevices> {
        self.local_devices.get(&service.to_ascii_lowercase())
    }

    /// Like [`local_devices`](Self::local_devices) but fails with
    /// [`Error::MissingLocalDevices`].
    pub fn require_local_devices(&self, service: &str) -> Result<&LocalDevices> {
        self.local_devices(service)
            .ok_or_else(|| Error::MissingLocalDevices {
                service: service.to_string(),
            })
    }

    /// Looks up a typed value.
    ///
    /// # Errors
    ///
    /// [`Error::ContextKey`] if nothing is stored under `key`,
    /// [`Error::ContextType`] if the stored value is not a `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use volplane::RequestContext;
    ///
    /// let ctx = RequestContext::new().with_value("tenant", String::from("acme"));
    /// assert_eq!(ctx.value::<String>("tenant").unwrap().as_str(), "acme");
    /// assert!(ctx.value::<u32>("tenant").is_err());
    /// assert!(ctx.value::<String>("region").is_err());
    /// ```
    pub fn value<T: Any + Send + Sync>(&self, key: &'static str) -> Result<Arc<T>> {
        let value = self.values.get(key).ok_or(Error::ContextKey { key })?;
        Arc::clone(value)
            .downcast::<T>()
            .map_err(|_| Error::ContextType {
                key,
                expected: std::any::type_name::<T>(),
            })
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("user", &self.user)
            .field("instance_ids", &self.instance_ids)
            .field("local_devices", &self.local_devices)
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}
