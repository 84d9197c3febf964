//! Configuration loading from environment.

use std::env;
use std::fs;

use anyhow::Context;
use checkout_providers::{Credentials, ProviderKind, RunMode};

/// Provider selection plus the credential bundle handed to the registry.
pub struct Config {
    pub provider: ProviderKind,
    pub credentials: Credentials,
}

impl Config {
    /// Loads configuration from `CHECKOUT_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).unwrap_or_default();

        let provider: ProviderKind = lookup("CHECKOUT_PROVIDER_TYPE")
            .ok_or_else(|| {
                anyhow::anyhow!("CHECKOUT_PROVIDER_TYPE environment variable is required")
            })?
            .parse()?;
        let mode: RunMode = lookup("CHECKOUT_RUN_MODE")
            .unwrap_or_else(|| "sandbox".to_string())
            .parse()?;

        let credentials = Credentials {
            client_id: var("CHECKOUT_CLIENT_ID"),
            client_secret: var("CHECKOUT_CLIENT_SECRET"),
            client_id2: var("CHECKOUT_CLIENT_ID2"),
            client_secret2: var("CHECKOUT_CLIENT_SECRET2"),
            app_certificate: var("CHECKOUT_APP_CERTIFICATE"),
            app_private_key: read_key_file(lookup("CHECKOUT_APP_PRIVATE_KEY_FILE"))?,
            cert_public_key: read_key_file(lookup("CHECKOUT_CERT_PUBLIC_KEY_FILE"))?,
            host: var("CHECKOUT_HOST"),
            webhook_secret: var("CHECKOUT_WEBHOOK_SECRET"),
            mode,
            base_url: lookup("CHECKOUT_BASE_URL").filter(|url| !url.trim().is_empty()),
        };

        Ok(Self {
            provider,
            credentials,
        })
    }
}

fn read_key_file(path: Option<String>) -> anyhow::Result<String> {
    match path.filter(|p| !p.trim().is_empty()) {
        Some(path) => fs::read_to_string(&path).with_context(|| format!("reading key file {path}")),
        None => Ok(String::new()),
    }
}
