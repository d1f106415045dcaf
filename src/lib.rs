//! Programmable HTTP stub server
//!
//! A lightweight HTTP server that answers requests from a registry of stubs.
//! Each stub pairs a request predicate with a response definition; the first
//! registered stub whose predicate accepts a request produces the response.
//!
//! # Features
//!
//! - **Request Matching**: Match by method, path, headers, query params, body
//! - **Static Responses**: Return fixed bodies byte-for-byte
//! - **Dynamic Templates**: Render bodies from the request with `{{…}}`
//!   directives, including render-scoped `assign` and JSON merging
//! - **Latency Simulation**: Add fixed or random delays
//! - **Failure Injection**: Simulate errors, timeouts, and empty responses
//! - **Admin API**: Register, list, remove, and reset stubs over HTTP
//!
//! # Example
//!
//! ```no_run
//! use stub_server::{RequestPredicate, ResponseDefinition, ServerConfig, StubServer};
//! use hyper::Method;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = StubServer::start(ServerConfig::default()).await?;
//! server
//!     .registry()
//!     .register(
//!         RequestPredicate::exact(Method::POST, "/echo"),
//!         ResponseDefinition::new(200).with_text("{{request.body}}").templated(),
//!     )
//!     .await;
//! println!("listening on {}", server.base_url());
//! # Ok(())
//! # }
//! ```
//!
//! # Example Configuration
//!
//! ```yaml
//! stubs:
//!   - id: hello-world
//!     request:
//!       method: [GET]
//!       path:
//!         type: exact
//!         value: /hello
//!     response:
//!       status: 200
//!       body:
//!         type: json
//!         content:
//!           message: "Hello, World!"
//! ```

mod admin;
pub mod config;
mod directive;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod request;
pub mod server;
pub mod template;

pub use config::{ResponseBody, ResponseDefinition, ServerConfig, StubDefinition};
pub use error::{
    RegistryError, RequestError, ResponseError, ServerError, StubError, TemplateError,
};
pub use matcher::{MatchContext, RequestPredicate};
pub use registry::{Stub, StubId, StubRegistry};
pub use request::IncomingRequest;
pub use server::StubServer;
pub use template::{TemplateContext, TemplateEngine};
