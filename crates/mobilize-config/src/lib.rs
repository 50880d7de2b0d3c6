//! KDL configuration parsing for the mobilize build orchestrator.
//!
//! One file (`mobilize.kdl` by default) configures the server, the job
//! store, the orchestrator's retry and timeout policy, and the endpoints of
//! the external collaborators. Credentials are never stored in the file;
//! nodes name the environment variables that hold them.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    CompileConfig, DatabaseConfig, GenerationConfig, GitHubConfig, OrchestratorSettings,
    ServerConfig, ServiceConfig, SystemConfig, load_system_config, parse_system_config,
};
