//! Wire-dialect codecs and the service mock contract for MockStack.
//!
//! Every emulated service speaks exactly one dialect:
//!
//! - [`AwsJsonCodec`]: `X-Amz-Target` + JSON (awsJson 1.0 / 1.1, with a CBOR variant)
//! - [`RpcV2CborCodec`]: `/service/<S>/operation/<Op>` + CBOR
//! - [`AwsQueryCodec`]: `Action` form field + XML responses
//! - [`RestJsonCodec`] / [`RestXmlCodec`]: method + path route table
//!
//! A [`Provider`] holds a service's business logic over one resource store;
//! [`ProtocolMock`] binds it to a codec and yields a [`ServiceMock`].

pub mod call;
pub mod cbor;
pub mod codec;
pub mod error;
pub mod json;
pub mod mock;
pub mod query;
pub mod response;
pub mod rest;
pub mod xml;

pub use call::{Call, Output};
pub use cbor::RpcV2CborCodec;
pub use codec::{Codec, TimestampFormat};
pub use error::{ErrorCodes, ErrorKind, ServiceError};
pub use json::{AwsJsonCodec, JsonVersion};
pub use mock::{ProtocolMock, Provider, ServiceMock};
pub use query::AwsQueryCodec;
pub use rest::{Payload, Route, RouteTable, RestJsonCodec, RestXmlCodec};
pub use xml::XmlError;
