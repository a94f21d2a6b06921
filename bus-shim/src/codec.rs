//! Encodes and decodes [`Envelope`]s to and from the bus wire frames in [`crate::wire`].
//!
//! Kept separate from [`crate::transport`] so the encode/decode step — the part that actually
//! exercises the action-tag dispatch — can be unit tested without standing up a transport.

use atomix_cluster::Envelope;
use atomix_cluster::InboundMessage;
use atomix_cluster::OutboundMessage;

use crate::wire::BusRequestFrame;
use crate::wire::BusResponseFrame;

#[derive(Debug, thiserror::Error)]
pub enum BusShimError {
    #[error("failed to encode bus frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to decode bus frame: {0}")]
    Decode(serde_json::Error),
}

pub fn encode_request(id: u64, envelope: Envelope<OutboundMessage>) -> Result<Vec<u8>, BusShimError> {
    let frame = BusRequestFrame { id, term: envelope.term, leader: envelope.leader_at_send, body: envelope.body.into() };
    Ok(serde_json::to_vec(&frame)?)
}

pub fn decode_request(bytes: &[u8]) -> Result<(u64, Envelope<OutboundMessage>), BusShimError> {
    let frame: BusRequestFrame = serde_json::from_slice(bytes).map_err(BusShimError::Decode)?;
    let envelope = Envelope::new(frame.term, frame.leader, frame.body.into());
    Ok((frame.id, envelope))
}

pub fn encode_response(id: u64, envelope: Envelope<InboundMessage>) -> Result<Vec<u8>, BusShimError> {
    let frame = BusResponseFrame { id, term: envelope.term, leader: envelope.leader_at_send, body: envelope.body.into() };
    Ok(serde_json::to_vec(&frame)?)
}

pub fn decode_response(bytes: &[u8]) -> Result<(u64, Envelope<InboundMessage>), BusShimError> {
    let frame: BusResponseFrame = serde_json::from_slice(bytes).map_err(BusShimError::Decode)?;
    let envelope = Envelope::new(frame.term, frame.leader, frame.body.into());
    Ok((frame.id, envelope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_command_round_trips_tagged_as_submit_command_not_request_vote() {
        let envelope = Envelope::new(3, Some(1), OutboundMessage::Client(atomix_primitives::Command::KeepAlive { session_id: 7, command_sequence_ack: 0, event_index_ack: 0 }));
        let bytes = encode_request(42, envelope).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"action\":\"submitCommand\""), "expected submitCommand tag, got {}", text);
        assert!(!text.contains("\"action\":\"requestVote\""));

        let (id, decoded) = decode_request(&bytes).unwrap();
        assert_eq!(id, 42);
        match decoded.body {
            OutboundMessage::Client(atomix_primitives::Command::KeepAlive { session_id, .. }) => assert_eq!(session_id, 7),
            other => panic!("expected KeepAlive command, got {:?}", other),
        }
    }

    #[test]
    fn a_frame_mistagged_like_the_legacy_bug_fails_to_decode_rather_than_being_misrouted() {
        // Mirrors the documented legacy bug: a SubmitCommand body carried under the
        // "requestVote" action tag. Strict per-tag typing means this is rejected at decode
        // time instead of being handed to the vote-handling path with the wrong payload shape.
        let malformed = br#"{"id":1,"term":0,"leader":null,"action":"requestVote","body":{"sessionId":7,"sequence":1,"payload":[]}}"#;
        assert!(decode_request(malformed).is_err());
    }
}
