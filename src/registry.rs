use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::backend::shell::BackendClient;
use crate::backend::Backend;
use crate::config::{AppConfig, BackendSettings};
use crate::error::DerechoError;
use crate::events::EventBus;
use crate::message::GenerationConfig;

/// Builds a concrete adapter for a validated config. Registration is
/// explicit, at startup, by the embedding application — there is no
/// dynamic loading.
pub type AdapterConstructor =
    Arc<dyn Fn(&GenerationConfig) -> Result<Box<dyn Backend>, DerechoError> + Send + Sync>;

/// Static registration record for one backend. Immutable after
/// registration. The constructor satisfies the `Backend` contract by
/// type; there is nothing further to verify at registration time.
#[derive(Clone)]
pub struct BackendDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub supported_models: Vec<String>,
    pub default_model: String,
    pub requires_api_key: bool,
    pub supports_streaming: bool,
    pub supports_functions: bool,
    /// Descriptor-level config defaults, overridden by persisted settings
    /// and call-site overrides in that order.
    pub defaults: BackendSettings,
    pub constructor: AdapterConstructor,
}

impl std::fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("supported_models", &self.supported_models)
            .field("default_model", &self.default_model)
            .field("requires_api_key", &self.requires_api_key)
            .field("supports_streaming", &self.supports_streaming)
            .field("supports_functions", &self.supports_functions)
            .finish()
    }
}

/// Counts exposed for display layers.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub registered_backends: usize,
    pub cached_clients: usize,
    pub default_backend: Option<String>,
}

/// Decouples "which backend" from "how to build and reuse one": stores
/// descriptors, merges configuration, constructs adapters, and caches at
/// most one live client per (backend, model) pair.
pub struct BackendRegistry {
    descriptors: RwLock<HashMap<String, Arc<BackendDescriptor>>>,
    default_backend: RwLock<Option<String>>,
    /// Keyed by `name/model`. A tokio mutex held across the availability
    /// probe makes get-or-create effectively atomic under concurrent load.
    cache: Mutex<HashMap<String, Arc<BackendClient>>>,
    config: AppConfig,
    events: EventBus,
}

impl BackendRegistry {
    pub fn new(config: AppConfig, events: EventBus) -> Self {
        let default_backend = config.default_backend.clone();
        Self {
            descriptors: RwLock::new(HashMap::new()),
            default_backend: RwLock::new(default_backend),
            cache: Mutex::new(HashMap::new()),
            config,
            events,
        }
    }

    /// Register a backend descriptor under its canonical name.
    /// The first registration becomes the default when none is configured.
    pub fn register(&self, descriptor: BackendDescriptor) -> Result<(), DerechoError> {
        let name = descriptor.name.clone();
        {
            let mut descriptors = self.descriptors.write().expect("descriptors lock");
            if descriptors.contains_key(&name) {
                return Err(DerechoError::DuplicateBackend(name));
            }
            descriptors.insert(name.clone(), Arc::new(descriptor));
        }

        let mut default = self.default_backend.write().expect("default lock");
        if default.is_none() {
            tracing::info!(backend = %name, "first registered backend becomes default");
            *default = Some(name.clone());
        }
        tracing::info!(backend = %name, "registered backend");
        Ok(())
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<BackendDescriptor>> {
        self.descriptors
            .read()
            .expect("descriptors lock")
            .get(name)
            .cloned()
    }

    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .descriptors
            .read()
            .expect("descriptors lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn supported_models(&self, name: &str) -> Vec<String> {
        self.descriptor(name)
            .map(|d| d.supported_models.clone())
            .unwrap_or_default()
    }

    /// Suggest similar backend names for a failed lookup (substring match).
    /// Sorted alphabetically, capped at 5 to keep error messages readable.
    pub fn suggest(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return vec![];
        }
        let mut suggestions: Vec<String> = self
            .descriptors
            .read()
            .expect("descriptors lock")
            .keys()
            .filter(|k| {
                let k_lower = k.to_lowercase();
                k_lower.contains(&q) || q.contains(&k_lower)
            })
            .cloned()
            .collect();
        suggestions.sort();
        suggestions.truncate(5);
        suggestions
    }

    pub fn set_default(&self, name: &str) -> Result<(), DerechoError> {
        if self.descriptor(name).is_none() {
            return Err(DerechoError::UnknownBackend {
                name: name.to_string(),
                suggestions: self.suggest(name),
            });
        }
        *self.default_backend.write().expect("default lock") = Some(name.to_string());
        Ok(())
    }

    pub fn default_backend(&self) -> Option<String> {
        self.default_backend.read().expect("default lock").clone()
    }

    /// Resolve an explicit name or fall back to the process-wide default.
    fn resolve_name(&self, name: Option<&str>) -> Result<String, DerechoError> {
        match name {
            Some(n) => {
                if self.descriptor(n).is_some() {
                    Ok(n.to_string())
                } else {
                    Err(DerechoError::UnknownBackend {
                        name: n.to_string(),
                        suggestions: self.suggest(n),
                    })
                }
            }
            None => self
                .default_backend()
                .ok_or(DerechoError::NoBackendAvailable),
        }
    }

    /// Merge configuration: descriptor defaults → persisted per-backend
    /// settings → call-site override (later wins). The merged result is
    /// validated before any adapter is constructed.
    fn merged_config(
        &self,
        descriptor: &BackendDescriptor,
        model: Option<&str>,
        overrides: Option<GenerationConfig>,
    ) -> Result<GenerationConfig, DerechoError> {
        let mut config = GenerationConfig {
            model: descriptor.default_model.clone(),
            ..GenerationConfig::default()
        };
        descriptor.defaults.apply_to(&mut config);

        if let Some(settings) = self.config.backend_settings(&descriptor.name) {
            settings.apply_to(&mut config);
            if let Some(ref m) = settings.model {
                config.model = m.clone();
            }
        }

        if let Some(mut over) = overrides {
            if over.model.is_empty() {
                over.model = config.model.clone();
            }
            config = over;
        }
        if let Some(m) = model {
            config.model = m.to_string();
        }

        config.validate()?;
        Ok(config)
    }

    fn cache_key(name: &str, model: &str) -> String {
        format!("{name}/{model}")
    }

    /// Construct a new client and cache it. A constructor failure
    /// propagates to the caller and leaves the cache untouched.
    pub async fn create_client(
        &self,
        name: Option<&str>,
        model: Option<&str>,
        overrides: Option<GenerationConfig>,
    ) -> Result<Arc<BackendClient>, DerechoError> {
        let name = self.resolve_name(name)?;
        let descriptor = self.descriptor(&name).ok_or(DerechoError::UnknownBackend {
            name: name.clone(),
            suggestions: vec![],
        })?;
        let config = self.merged_config(&descriptor, model, overrides)?;

        let key = Self::cache_key(&name, &config.model);
        let adapter = (descriptor.constructor)(&config)?;
        let client = Arc::new(BackendClient::new(adapter, config, self.events.clone())?);

        self.cache
            .lock()
            .await
            .insert(key.clone(), Arc::clone(&client));
        tracing::info!(backend = %name, key = %key, "created backend client");
        Ok(client)
    }

    /// Return the cached client for (backend, model) if it reports itself
    /// available, else build a fresh one. The cache lock is held across
    /// the probe and construction so concurrent callers never race two
    /// live clients for the same key.
    pub async fn get_or_create(
        &self,
        name: Option<&str>,
        model: Option<&str>,
        overrides: Option<GenerationConfig>,
    ) -> Result<Arc<BackendClient>, DerechoError> {
        let name = self.resolve_name(name)?;
        let descriptor = self.descriptor(&name).ok_or(DerechoError::UnknownBackend {
            name: name.clone(),
            suggestions: vec![],
        })?;
        let config = self.merged_config(&descriptor, model, overrides)?;
        let key = Self::cache_key(&name, &config.model);

        let mut cache = self.cache.lock().await;
        if let Some(client) = cache.get(&key) {
            if client.is_available().await {
                return Ok(Arc::clone(client));
            }
            tracing::warn!(key = %key, "cached client unavailable — rebuilding");
            cache.remove(&key);
        }

        let adapter = (descriptor.constructor)(&config)?;
        let client = Arc::new(BackendClient::new(adapter, config, self.events.clone())?);
        cache.insert(key.clone(), Arc::clone(&client));
        tracing::info!(backend = %name, key = %key, "created backend client");
        Ok(client)
    }

    /// Names of backends usable right now: credentialed backends need a
    /// configured key; credential-free backends get a reachability probe.
    /// Probe failures are logged and reported as unavailable, never raised.
    pub async fn available_backends(&self) -> Vec<String> {
        let descriptors: Vec<Arc<BackendDescriptor>> = {
            let map = self.descriptors.read().expect("descriptors lock");
            map.values().cloned().collect()
        };

        let mut available = Vec::new();
        for descriptor in descriptors {
            if descriptor.requires_api_key {
                if self.config.has_api_key(&descriptor.name) {
                    available.push(descriptor.name.clone());
                }
                continue;
            }
            if self.probe(&descriptor).await {
                available.push(descriptor.name.clone());
            } else {
                tracing::debug!(backend = %descriptor.name, "availability probe failed");
            }
        }
        available.sort();
        available
    }

    /// Build a throwaway adapter and ask it. Construction failures count
    /// as unavailable.
    async fn probe(&self, descriptor: &BackendDescriptor) -> bool {
        let config = match self.merged_config(descriptor, None, None) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(backend = %descriptor.name, error = %e, "probe config invalid");
                return false;
            }
        };
        match (descriptor.constructor)(&config) {
            Ok(adapter) => adapter.is_available().await,
            Err(e) => {
                tracing::debug!(backend = %descriptor.name, error = %e, "probe construction failed");
                false
            }
        }
    }

    /// Drop one cached client, running its teardown.
    pub async fn cleanup(&self, name: &str, model: &str) {
        let key = Self::cache_key(name, model);
        let removed = self.cache.lock().await.remove(&key);
        if let Some(client) = removed {
            client.shutdown().await;
            tracing::info!(key = %key, "cleaned up backend client");
        }
    }

    /// Drop every cached client, running each teardown.
    pub async fn cleanup_all(&self) {
        let clients: Vec<Arc<BackendClient>> = {
            let mut cache = self.cache.lock().await;
            cache.drain().map(|(_, c)| c).collect()
        };
        for client in &clients {
            client.shutdown().await;
        }
        tracing::info!(count = clients.len(), "cleaned up all backend clients");
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered_backends: self.descriptors.read().expect("descriptors lock").len(),
            cached_clients: self.cache.lock().await.len(),
            default_backend: self.default_backend(),
        }
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.config
    }
}
