//! HTTP clients for the collaborators of the mobilize build orchestrator.
//!
//! Each client implements one of the collaborator traits from
//! `mobilize_core::collaborator` and classifies every failure as retryable
//! or fatal before handing it back to the orchestrator.

pub mod compile;
pub mod conversion;
pub mod generation;
pub mod github;
mod http;

pub use compile::HttpCompileService;
pub use conversion::HttpConversionEngine;
pub use generation::HttpCodeGenerator;
pub use github::GitHubPublisher;

use mobilize_config::SystemConfig;
use mobilize_core::Collaborators;
use std::sync::Arc;
use tracing::warn;

/// Build the collaborators the configuration describes.
///
/// A section that is absent, or whose credential variable is unset, leaves
/// its collaborator out; the API reports such jobs as needing setup.
pub fn collaborators_from_config(config: &SystemConfig) -> Collaborators {
    let mut collaborators = Collaborators::default();

    if let Some(conversion) = &config.conversion {
        collaborators.conversion = Some(Arc::new(HttpConversionEngine::new(&conversion.url)));
    }

    if let Some(generation) = &config.generation {
        match generation.api_key() {
            Some(key) => {
                collaborators.generation =
                    Some(Arc::new(HttpCodeGenerator::new(&generation.url, key)));
            }
            None => warn!(env = %generation.api_key_env, "Generation API key not set"),
        }
    }

    if let Some(github) = &config.github {
        match github.token() {
            Some(token) => {
                collaborators.publisher = Some(Arc::new(GitHubPublisher::new(github, token)));
            }
            None => warn!(env = %github.token_env, "GitHub token not set"),
        }
    }

    if let Some(compile) = &config.compile {
        collaborators.compile = Some(Arc::new(HttpCompileService::new(
            &compile.url,
            compile.token(),
        )));
    }

    collaborators
}
