//! Config bridge between the companion app and the broadcast worker
//!
//! The app writes the destination URL; the worker reads it once when a
//! broadcast starts. Both sides address the same namespace in a
//! [`SharedStore`].

pub mod store;

use std::sync::Arc;

use crate::error::Result;

pub use store::{JsonFileStore, MemoryStore, SharedStore};

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "group.screencast.ScreenCast";

/// Key holding the RTMP destination URL
pub const DESTINATION_KEY: &str = "rtmp_url";

/// Key holding the broadcast worker's identity
pub const EXTENSION_IDENTITY_KEY: &str = "broadcast_extension_bundle_id";

/// Appended to the app identity when no worker identity is stored
const EXTENSION_SUFFIX: &str = "BroadcastUpload";

/// Typed access to the shared destination settings
#[derive(Clone)]
pub struct ConfigBridge {
    store: Arc<dyn SharedStore>,
    namespace: String,
    app_id: Option<String>,
}

impl ConfigBridge {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
            app_id: None,
        }
    }

    /// Use a different namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Identity of the companion app, used to derive the default worker identity
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn namespace_name(&self) -> &str {
        &self.namespace
    }

    /// Configured destination URL. Empty counts as unset.
    pub fn read_destination(&self) -> Result<Option<String>> {
        let value = self.store.get(&self.namespace, DESTINATION_KEY)?;
        Ok(value.filter(|url| !url.trim().is_empty()))
    }

    pub fn write_destination(&self, url: &str) -> Result<()> {
        tracing::debug!(namespace = %self.namespace, url = %url, "Writing destination");
        self.store.set(&self.namespace, DESTINATION_KEY, url)
    }

    /// Remove the stored destination
    pub fn clear_destination(&self) -> Result<()> {
        self.store.remove(&self.namespace, DESTINATION_KEY)
    }

    /// Stored worker identity, else `<app_id>BroadcastUpload`, else `None`
    pub fn extension_identity(&self) -> Result<Option<String>> {
        let stored = self
            .store
            .get(&self.namespace, EXTENSION_IDENTITY_KEY)?
            .filter(|id| !id.is_empty());
        Ok(stored.or_else(|| {
            self.app_id
                .as_ref()
                .map(|app| format!("{}{}", app, EXTENSION_SUFFIX))
        }))
    }

    pub fn write_extension_identity(&self, identity: &str) -> Result<()> {
        self.store
            .set(&self.namespace, EXTENSION_IDENTITY_KEY, identity)
    }
}

impl std::fmt::Debug for ConfigBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBridge")
            .field("namespace", &self.namespace)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> ConfigBridge {
        ConfigBridge::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_destination_unset() {
        assert_eq!(bridge().read_destination().unwrap(), None);
    }

    #[test]
    fn test_destination_round_trip() {
        let bridge = bridge();
        bridge.write_destination("rtmp://host/app/key").unwrap();
        assert_eq!(
            bridge.read_destination().unwrap().as_deref(),
            Some("rtmp://host/app/key")
        );

        bridge.clear_destination().unwrap();
        assert_eq!(bridge.read_destination().unwrap(), None);
    }

    #[test]
    fn test_empty_destination_is_unset() {
        let bridge = bridge();
        bridge.write_destination("").unwrap();
        assert_eq!(bridge.read_destination().unwrap(), None);
        bridge.write_destination("   ").unwrap();
        assert_eq!(bridge.read_destination().unwrap(), None);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let app = ConfigBridge::new(store.clone()).namespace("group.a");
        let other = ConfigBridge::new(store.clone()).namespace("group.b");
        let worker = ConfigBridge::new(store).namespace("group.a");

        app.write_destination("rtmp://h/a/k").unwrap();
        assert_eq!(other.read_destination().unwrap(), None);
        assert_eq!(
            worker.read_destination().unwrap().as_deref(),
            Some("rtmp://h/a/k")
        );
    }

    #[test]
    fn test_extension_identity_fallback() {
        let bridge = bridge();
        assert_eq!(bridge.extension_identity().unwrap(), None);

        let bridge = bridge.app_id("com.example.ScreenCast");
        assert_eq!(
            bridge.extension_identity().unwrap().as_deref(),
            Some("com.example.ScreenCastBroadcastUpload")
        );

        bridge.write_extension_identity("com.example.Worker").unwrap();
        assert_eq!(
            bridge.extension_identity().unwrap().as_deref(),
            Some("com.example.Worker")
        );
    }

    #[test]
    fn test_file_backed_bridge_shared_between_processes() {
        let dir = tempfile::tempdir().unwrap();
        let app = ConfigBridge::new(Arc::new(JsonFileStore::new(dir.path())));
        let worker = ConfigBridge::new(Arc::new(JsonFileStore::new(dir.path())));

        app.write_destination("rtmp://live.example.com/app/abc").unwrap();
        assert_eq!(
            worker.read_destination().unwrap().as_deref(),
            Some("rtmp://live.example.com/app/abc")
        );
    }
}
