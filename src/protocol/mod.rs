//! Resource protocol guard.
//!
//! The application serves its front-end through a scheme (`app://localhost/…`
//! by default, or plain `file://`). Every request on that scheme, and on
//! `file://`, goes through the same [`ResourceResolver`], so nothing outside
//! the application root can be served on any session that can see the app.

mod resolver;

pub use resolver::ResourceResolver;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::host::{ProtocolHandler, ProtocolHost};
use crate::plugin::{ConfigureAccumulator, CustomScheme};
use crate::types::{AppConfig, Result, FILE_SCHEME};

/// Schemes to declare privileged before the host is ready: the application
/// scheme (standard + secure) unless it is `file`, then whatever plugins
/// declared. A plugin declaration under the application scheme's name wins.
pub fn privileged_schemes(app: &AppConfig, accumulator: &ConfigureAccumulator) -> Vec<CustomScheme> {
    let mut schemes = Vec::new();
    if !app.is_file_protocol() && accumulator.scheme(&app.scheme).is_none() {
        schemes.push(CustomScheme::standard_secure(app.scheme.clone()));
    }
    schemes.extend(accumulator.schemes().cloned());
    schemes
}

/// Declare [`privileged_schemes`] on `host`.
pub fn register_privileged_schemes(
    host: &dyn ProtocolHost,
    app: &AppConfig,
    accumulator: &ConfigureAccumulator,
) -> Result<()> {
    let schemes = privileged_schemes(app, accumulator);
    tracing::info!(
        schemes = ?schemes.iter().map(|s| s.scheme.as_str()).collect::<Vec<_>>(),
        "registering privileged schemes"
    );
    host.register_schemes_as_privileged(&schemes)
}

/// Sandboxed handler for the application scheme and `file://`.
#[derive(Debug, Clone)]
pub struct ProtocolGuard {
    resolver: Arc<ResourceResolver>,
    scheme: String,
    partitions: BTreeSet<String>,
}

impl ProtocolGuard {
    pub fn new(app: &AppConfig, accumulator: &ConfigureAccumulator) -> Result<Self> {
        Ok(Self {
            resolver: Arc::new(ResourceResolver::from_app(app)?),
            scheme: app.scheme.clone(),
            partitions: accumulator.partitions().clone(),
        })
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    /// Resolve one request URL.
    pub fn handle(&self, url: &str) -> Result<PathBuf> {
        self.resolver.resolve(url)
    }

    /// Install the handler on the default session and every required
    /// partition. Returns the number of registrations made.
    pub fn install(&self, host: &dyn ProtocolHost) -> Result<usize> {
        let handler: ProtocolHandler = {
            let resolver = Arc::clone(&self.resolver);
            Arc::new(move |url: &str| resolver.resolve(url))
        };

        let mut schemes = vec![FILE_SCHEME];
        if self.scheme != FILE_SCHEME {
            schemes.push(self.scheme.as_str());
        }
        let sessions =
            std::iter::once(None).chain(self.partitions.iter().map(|p| Some(p.as_str())));

        let mut installed = 0;
        for partition in sessions {
            for scheme in &schemes {
                host.register_file_protocol(partition, scheme, Arc::clone(&handler))?;
                tracing::debug!(
                    scheme = %scheme,
                    partition = partition.unwrap_or("default"),
                    "protocol guard installed"
                );
                installed += 1;
            }
        }

        tracing::info!(
            base_url = self.resolver.base_url(),
            root = %self.resolver.app_root().display(),
            installed,
            "resource protocol ready"
        );
        Ok(installed)
    }
}
