#[cfg(feature = "browser")]
pub mod browser_session;
pub mod object_store;

#[cfg(feature = "browser")]
pub use browser_session::{ChromeOptions, ChromePageSession, ChromeSessionProvider};
pub use object_store::HttpObjectStore;
