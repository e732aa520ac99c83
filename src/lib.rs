//! # Adapterkit - typed HTTP request adapters
//!
//! Adapterkit wraps a pluggable transport behind one request pipeline: layered
//! config, URL templating, base URL and base path composition, header merging,
//! timeouts and abort signals, retries, response validation and four hook
//! chains. Declarative [`Endpoint`]s bind a URL template, a search-parameter
//! contract and validators on top of an [`Adapter`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use adapterkit::{Adapter, EndpointConfig, RequestConfig, Validator};
//! use http::Method;
//! use serde::Deserialize;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), adapterkit::RequestError> {
//!     let adapter = Adapter::builder()
//!         .base_url("https://api.example.com")?
//!         .base_path("/v1")
//!         .default_timeout(Duration::from_secs(30))
//!         .default_auto_retry(2)
//!         .default_retry_delay(Duration::from_millis(200))
//!         .build()?;
//!
//!     // Ad-hoc requests
//!     let user = adapter.get("/users/123", None).await?.json::<User>()?;
//!     println!("User {}: {}", user.id, user.name);
//!
//!     let created = adapter
//!         .post("/users", RequestConfig::new().with_body(json!({ "name": "Alice" })))
//!         .await?;
//!     println!("Created with status {}", created.status());
//!
//!     // Declarative endpoints
//!     let users = adapter.endpoint(
//!         EndpointConfig::new("/users/{id}")
//!             .validate(Method::GET, Validator::deserializes::<User>())
//!             .accepts([Method::GET, Method::DELETE]),
//!     )?;
//!     let user = users.get([("id", "123")]).await?;
//!     println!("Fetched in {:?}", user.latency);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every failure is a [`RequestError`]. Its [`ErrorKind`] names the failure class,
//! and the request context travels with it:
//!
//! ```no_run
//! use adapterkit::{Adapter, ErrorKind};
//!
//! # async fn example() -> Result<(), adapterkit::RequestError> {
//! # let adapter = Adapter::builder().base_url("https://api.example.com")?.build()?;
//! match adapter.get("/endpoint", None).await {
//!     Ok(response) => println!("Success: {}", response.data),
//!     Err(e) if e.kind == ErrorKind::Validation => {
//!         eprintln!("Invalid payload: {:?}", e.issues);
//!     }
//!     Err(e) if e.status.is_some() => {
//!         eprintln!("{} ({})", e.reason, e.raw_response().unwrap_or_default());
//!     }
//!     Err(e) => eprintln!("Other error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Retries
//!
//! `auto_retry = N` allows up to `N + 1` attempts, with `retry_delay` between
//! them. Any attempt that did not end with a 2xx status is retried: 4xx, 5xx,
//! timeouts and transport failures. A payload that fails validation after a 2xx
//! response is not retried, and neither is an external abort.

mod abort;
mod adapter;
mod config;
mod endpoint;
mod error;
pub mod extensions;
pub mod hooks;
mod response;
mod template;
pub mod transport;
mod url_builder;
pub mod validate;

pub use abort::{AbortController, AbortSignal};
pub use adapter::{Adapter, PreparedRequest, DEFAULT_CONTENT_TYPE};
pub use config::{AdapterOptions, RequestConfig, SearchParams};
pub use endpoint::{Endpoint, EndpointArgs, EndpointConfig};
pub use error::{BoxError, ErrorKind, RequestError, Result, TransportError};
pub use hooks::{BeforeRequest, Handler, HandlerId};
pub use response::ResponseEnvelope;
pub use template::UrlTemplate;
pub use transport::{RawResponse, ReqwestTransport, Transport, TransportRequest};
pub use url_builder::{apply_search_params, prepare_url, DEFAULT_BASE_URL};
pub use validate::Validator;
