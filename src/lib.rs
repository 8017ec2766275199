pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod provider;
pub mod proxy;
pub mod queue;
pub mod relay;
pub mod scheduler;
pub mod session;
