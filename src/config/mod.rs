mod loader;

pub use loader::{
    Config, DisplayConfig, EndpointsConfig, LocalConfig, ServerConfig, SourcesConfig, TimingConfig,
};
