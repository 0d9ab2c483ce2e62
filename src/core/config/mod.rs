pub mod data;
pub mod defaults;
pub mod io;
pub mod printing;
pub mod store;

pub use data::Config;
pub use io::ConfigError;
pub use store::{FilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
