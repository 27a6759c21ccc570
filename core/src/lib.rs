//! Synchronous client core for the entity-management service.
//!
//! # Overview
//! Exposes find/create/update/delete/batch, schema, upload and download
//! operations over the service's RPC protocol and its side HTTP endpoints.
//! Queries are translated into the protocol's paged read requests and every
//! page is collected before returning, so callers always get the full result
//! set as one list.
//!
//! # Design
//! - `Shotgun` is stateless: configuration plus three collaborators
//!   (`RpcTransport` for the API and legacy endpoints, `HttpExecutor` for
//!   uploads, thumbnails and downloads).
//! - Request assembly (`filter`, `query`, `batch`, `multipart`, `upload`,
//!   `thumbnail`) is pure and unit-tested without I/O; the facade drives the
//!   transports.
//! - Default transports use blocking `ureq`; tests swap in scripted ones.

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod multipart;
pub mod query;
pub mod rpc;
pub mod thumbnail;
pub mod transport;
pub mod types;
pub mod upload;

pub use batch::BatchOperation;
pub use client::{Session, Shotgun};
pub use config::ClientConfig;
pub use error::{ApiError, Result};
pub use filter::{Condition, FilterGroup, Filters, LogicalOperator, Relation};
pub use http::{HttpExecutor, HttpMethod, HttpRequest, HttpResponse};
pub use query::{Direction, FindOptions, Sort};
pub use rpc::{Auth, RpcError, RpcMethod, RpcTransport};
pub use types::{Entity, EntityRef, FieldMap, FieldValue};
pub use upload::UploadRequest;
