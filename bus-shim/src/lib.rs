//! The legacy Raft-over-message-bus transport shim (§1: "the message-bus transport shim" is an
//! external collaborator the core treats as just another [`atomix_cluster::MessagingPlane`]; §9
//! DESIGN NOTES + REDESIGN FLAGS cover its wire protocol and the `requestVote`/`submitCommand`
//! action-tag bug).
//!
//! This crate only specifies and implements the wire protocol ([`wire`], [`codec`]) and a thin
//! [`transport::BusLink`] seam for the actual bus client library; it carries no opinion about which
//! bus is in use in production.

pub mod codec;
pub mod transport;
pub mod wire;

pub use codec::decode_request;
pub use codec::decode_response;
pub use codec::encode_request;
pub use codec::encode_response;
pub use codec::BusShimError;
pub use transport::serve_frame;
pub use transport::BusLink;
pub use transport::BusMessagingPlane;
pub use transport::LoopbackBus;
pub use wire::BusRequestBody;
pub use wire::BusRequestFrame;
pub use wire::BusResponseBody;
pub use wire::BusResponseFrame;
