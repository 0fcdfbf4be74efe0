//! Provider registry/factory.
//!
//! Owns provider configuration, lazily constructs provider instances, and
//! caches them per name for the process lifetime. Construction failures are
//! not cached, so a later call retries once configuration is fixed. The
//! registry is an explicit dependency injected into the service, not a
//! global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use super::capabilities::Feature;
use super::error::TranscriptionError;
use super::providers::{AssemblyAiProvider, TranscriptionProvider, WhisperApiProvider};
use crate::config::TranscriptionSettings;

/// Fallback iteration order when the default provider cannot serve a
/// request.
const PROVIDER_NAMES: &[&str] = &["assemblyai", "whisper-api"];

pub struct ProviderRegistry {
    settings: TranscriptionSettings,
    cache: Mutex<HashMap<String, Arc<dyn TranscriptionProvider>>>,
}

impl ProviderRegistry {
    pub fn new(settings: TranscriptionSettings) -> Self {
        Self {
            settings,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &TranscriptionSettings {
        &self.settings
    }

    pub fn get_default(&self) -> Result<Arc<dyn TranscriptionProvider>, TranscriptionError> {
        self.get(&self.settings.default_provider.clone())
    }

    /// Get a provider by name, constructing and caching it on first use.
    pub fn get(&self, name: &str) -> Result<Arc<dyn TranscriptionProvider>, TranscriptionError> {
        let name = normalize_name(name);

        let mut cache = self.cache.lock().expect("provider cache poisoned");
        if let Some(provider) = cache.get(&name) {
            return Ok(Arc::clone(provider));
        }

        let provider = self.construct(&name)?;
        cache.insert(name, Arc::clone(&provider));
        Ok(provider)
    }

    /// Select a provider whose capability set covers `required`.
    ///
    /// The configured default is tried first; if it lacks a feature or fails
    /// to instantiate, the remaining enabled providers are tried in
    /// configured order.
    pub fn get_with_features(
        &self,
        required: &[Feature],
    ) -> Result<Arc<dyn TranscriptionProvider>, TranscriptionError> {
        match self.get_default() {
            Ok(provider) if provider.features().is_superset_of(required) => {
                return Ok(provider);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Default provider unavailable: {}", e);
            }
        }

        let default = normalize_name(&self.settings.default_provider);
        for name in PROVIDER_NAMES {
            if *name == default {
                continue;
            }
            match self.get(name) {
                Ok(provider) if provider.features().is_superset_of(required) => {
                    return Ok(provider);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Provider '{}' unavailable: {}", name, e);
                }
            }
        }

        Err(TranscriptionError::NoCapableProvider {
            missing: required.to_vec(),
        })
    }

    /// Seed a pre-built provider instance, bypassing construction. Lets
    /// tests put a canned backend behind a real registry.
    #[cfg(test)]
    pub(crate) fn insert(&self, name: &str, provider: Arc<dyn TranscriptionProvider>) {
        self.cache
            .lock()
            .expect("provider cache poisoned")
            .insert(normalize_name(name), provider);
    }

    fn construct(
        &self,
        name: &str,
    ) -> Result<Arc<dyn TranscriptionProvider>, TranscriptionError> {
        let timeout = Duration::from_secs(self.settings.request_timeout_seconds);

        match name {
            "assemblyai" => {
                let settings = &self.settings.assemblyai;
                if !settings.enabled {
                    return Err(TranscriptionError::ProviderNotConfigured {
                        provider: name.to_string(),
                        reason: "provider is disabled".to_string(),
                    });
                }
                let api_key = settings.api_key.clone().filter(|k| !k.is_empty()).ok_or(
                    TranscriptionError::ProviderNotConfigured {
                        provider: name.to_string(),
                        reason: "api_key is required".to_string(),
                    },
                )?;
                Ok(Arc::new(AssemblyAiProvider::new(
                    api_key,
                    settings.endpoint.clone(),
                    timeout,
                )?))
            }
            "whisper-api" => {
                let settings = &self.settings.whisper_api;
                if !settings.enabled {
                    return Err(TranscriptionError::ProviderNotConfigured {
                        provider: name.to_string(),
                        reason: "provider is disabled".to_string(),
                    });
                }
                let endpoint = settings.endpoint.clone().filter(|e| !e.is_empty()).ok_or(
                    TranscriptionError::ProviderNotConfigured {
                        provider: name.to_string(),
                        reason: "endpoint is required".to_string(),
                    },
                )?;
                Ok(Arc::new(WhisperApiProvider::new(
                    endpoint,
                    settings.api_key.clone(),
                    timeout,
                )?))
            }
            _ => Err(TranscriptionError::ProviderNotConfigured {
                provider: name.to_string(),
                reason: "unknown provider".to_string(),
            }),
        }
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', "-").replace("assembly-ai", "assemblyai")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    fn settings(default: &str) -> TranscriptionSettings {
        TranscriptionSettings {
            default_provider: default.to_string(),
            assemblyai: ProviderSettings {
                enabled: true,
                api_key: Some("test-key".to_string()),
                endpoint: None,
            },
            whisper_api: ProviderSettings {
                enabled: true,
                api_key: None,
                endpoint: Some("http://localhost:3141/api/v1".to_string()),
            },
            ..TranscriptionSettings::default()
        }
    }

    #[test]
    fn test_get_default_provider() {
        let registry = ProviderRegistry::new(settings("assemblyai"));
        assert_eq!(registry.get_default().unwrap().name(), "assemblyai");
    }

    #[test]
    fn test_instances_cached_per_name() {
        let registry = ProviderRegistry::new(settings("assemblyai"));
        let first = registry.get("assemblyai").unwrap();
        let second = registry.get("assemblyai").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_disabled_provider_rejected() {
        let mut s = settings("assemblyai");
        s.whisper_api.enabled = false;
        let registry = ProviderRegistry::new(s);

        let err = registry.get("whisper-api").err().unwrap();
        assert!(matches!(
            err,
            TranscriptionError::ProviderNotConfigured { .. }
        ));
    }

    #[test]
    fn test_missing_credential_not_cached() {
        let mut s = settings("assemblyai");
        s.assemblyai.api_key = None;
        let registry = ProviderRegistry::new(s);

        assert!(registry.get("assemblyai").is_err());
        // A second call reconstructs instead of returning a cached failure.
        assert!(registry.get("assemblyai").is_err());
        assert!(registry.cache.lock().unwrap().is_empty());
    }

    #[test]
    fn test_feature_fallback_skips_incapable_default() {
        // whisper-api is the default but lacks diarization; assemblyai has it.
        let registry = ProviderRegistry::new(settings("whisper-api"));
        let provider = registry
            .get_with_features(&[Feature::Diarization])
            .unwrap();
        assert_eq!(provider.name(), "assemblyai");
    }

    #[test]
    fn test_feature_fallback_prefers_capable_default() {
        let registry = ProviderRegistry::new(settings("assemblyai"));
        let provider = registry
            .get_with_features(&[Feature::Diarization, Feature::Sentiment])
            .unwrap();
        assert_eq!(provider.name(), "assemblyai");
    }

    #[test]
    fn test_no_capable_provider_error_names_features() {
        let mut s = settings("whisper-api");
        s.assemblyai.enabled = false;
        let registry = ProviderRegistry::new(s);

        let err = registry
            .get_with_features(&[Feature::Diarization])
            .err()
            .unwrap();
        match err {
            TranscriptionError::NoCapableProvider { missing } => {
                assert_eq!(missing, vec![Feature::Diarization]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_underscore_name_normalized() {
        let registry = ProviderRegistry::new(settings("whisper_api"));
        assert_eq!(registry.get_default().unwrap().name(), "whisper-api");
    }
}
