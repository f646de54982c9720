pub mod backends;
pub mod error;
pub mod handle;
pub mod platform;
pub mod provider;
pub mod types;

#[cfg(test)]
pub mod fake;

pub use error::SandboxError;
pub use handle::SandboxHandle;
pub use provider::SandboxProvider;
pub use types::*;

use backends::platform::PlatformProvider;
use platform::PlatformClient;

/// Build the managed-platform provider from runtime config.
pub fn build_provider(
    http_client: reqwest::Client,
    api_base_url: &str,
    token: Option<String>,
) -> Box<dyn SandboxProvider> {
    tracing::info!(api_url = %api_base_url, "initializing platform sandbox provider");
    let client = PlatformClient::new(http_client, api_base_url.to_string(), token);
    Box::new(PlatformProvider::new(client))
}
