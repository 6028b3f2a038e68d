pub mod loader;
pub mod schema;

pub use loader::{ConfigFormat, ConfigLoader, Overrides};
pub use schema::{OutputFormat, ScraperConfig};
