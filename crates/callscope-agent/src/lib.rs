//! Callscope Agent
//!
//! Wires the capture pipeline together for a host application:
//! - `Instrumentor`: start, drive and complete outbound calls
//! - `ScopedInstrumentor`: request-scoped overrides for a block of calls
//! - Configuration file loading (YAML or TOML)

pub mod config;
pub mod instrumentor;
pub mod scoped;

pub use config::{ConfigFormat, load_config, parse_config};
pub use instrumentor::{Instrumentor, InstrumentorBuilder, PayloadCallback};
pub use scoped::ScopedInstrumentor;
