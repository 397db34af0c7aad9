//! Outbound HTTP Request Engine
//!
//! This library turns logical request descriptions (URI, method, headers,
//! query parameters, body, authentication, streaming policy) into
//! wire-level HTTP requests, executes them over shared, reusable client
//! connection pools, and converts wire responses back into structured
//! results with authentication retry, cookie persistence and
//! body-streaming policies applied.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use http_courier::config::Settings;
//! use http_courier::error::CourierError;
//! use http_courier::executor::RequestExecutor;
//! use http_courier::pool::{ClientRegistry, SharedClient};
//! use http_courier::request::RequestTemplate;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CourierError> {
//!     let settings = Settings {
//!         base_url: "https://api.example.com/api/v1".to_string(),
//!         ..Settings::default()
//!     };
//!     settings.validate()?;
//!
//!     // One shared client per configuration identity
//!     let registry = ClientRegistry::new();
//!     let client = registry.lookup_or_create(&settings.identity(), || {
//!         SharedClient::new(Arc::new(settings.transport()))
//!     });
//!     client.start().await?;
//!
//!     let executor = RequestExecutor::new(client.clone(), settings)?;
//!     let template = RequestTemplate::new(http::Method::GET, "clients");
//!     let mut result = executor.execute(&template).await?;
//!     println!("{}", result.text().await?);
//!
//!     client.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod constants;
pub mod cookies;
pub mod entity;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pool;
pub mod request;
pub mod response;
pub mod transport;
pub mod validation;

// Re-export commonly used types for convenience
pub use auth::{AuthPolicy, BasicChallengePolicy, Credentials};
pub use config::Settings;
pub use cookies::{CookieStore, MemoryCookieStore};
pub use entity::{Payload, SendBodyMode, StreamSource, StreamingMode, WireEntity};
pub use error::CourierError;
pub use executor::RequestExecutor;
pub use pool::{ClientRegistry, SharedClient};
pub use request::{CorrelationMode, LogicalRequest, RequestTemplate};
pub use response::{ExchangeResult, MediaTypeMode, ResponseAttributes};
pub use transport::{ReqwestTransport, SendOptions, Transport};
pub use validation::{ResponseValidator, StatusRangeValidator};

/// Current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
