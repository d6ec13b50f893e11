pub mod config;
pub mod device;
pub mod diagnostics;
pub mod engine;
pub mod host;
pub mod store;
pub mod webos;
pub mod wol;

pub use config::Config;
pub use config::LogLevel;
pub use device::TvConfiguration;
pub use engine::Orchestrator;
pub use webos::TvClient;
