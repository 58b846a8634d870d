//! HTTP protocol layer of the Riak client.
//!
//! - [`request`]: immutable requests and per-operation builders
//! - [`connection`]: dialing and reusable HTTP/1.1 connections
//! - [`dispatch`]: status-code outcome tables
//! - [`siblings`]: streaming `multipart/mixed` decoding
//! - [`keys`]: streaming key listings
//! - [`props`]: bucket properties

pub mod connection;
pub mod dispatch;
pub mod keys;
pub mod props;
pub mod request;
pub mod siblings;

pub use connection::Connection;
pub use dispatch::{OutcomeTable, ResponseBody, RiakResponse, dispatch};
pub use props::{BucketDetails, Properties, QuorumValue};
pub use request::{Endpoint, Request};
pub use siblings::SiblingRecord;
