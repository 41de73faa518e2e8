//! DNS wire encoding for outgoing queries and decoding of responses.

use super::ProbeError;
use hickory_resolver::proto::{
    ProtoError,
    op::{Message, MessageType, OpCode, Query, ResponseCode},
    rr::{Name, RData, RecordType},
    serialize::binary::{BinDecodable, BinEncodable},
};
use std::net::{IpAddr, SocketAddr};

/// Parses a configured domain into a DNS name once, at startup.
pub fn parse_name(domain: &str) -> Result<Name, ProbeError> {
    Name::from_ascii(domain).map_err(|source| ProbeError::InvalidDomain {
        domain: domain.to_string(),
        source,
    })
}

/// Encodes a recursive `A` query for `name` with the given identifier.
pub fn encode_query(id: u16, name: &Name) -> Result<Vec<u8>, ProbeError> {
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    message.add_query(Query::query(name.clone(), RecordType::A));
    message
        .to_bytes()
        .map_err(|source| ProbeError::Encode { id, source })
}

/// The parts of a response the receiver needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResponse {
    pub id: u16,
    pub response_code: ResponseCode,
    /// Name of the first question, if the response echoes one.
    pub question: Option<String>,
    /// Addresses from `A` and `AAAA` answer records, in answer order.
    pub addresses: Vec<IpAddr>,
}

/// Decodes a datagram received from `from` as a DNS response.
pub fn decode_response(buf: &[u8], from: SocketAddr) -> Result<DecodedResponse, ProbeError> {
    let message =
        Message::from_bytes(buf).map_err(|source| ProbeError::Malformed { from, source })?;
    if message.message_type() != MessageType::Response {
        return Err(ProbeError::NotAResponse {
            from,
            id: message.id(),
        });
    }

    let addresses = message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect();

    Ok(DecodedResponse {
        id: message.id(),
        response_code: message.response_code(),
        question: message.queries().first().map(|q| q.name().to_string()),
        addresses,
    })
}

/// Builds the wire form of a response to `query_bytes` answering every
/// question with the given `A` records.
#[cfg(any(test, feature = "test-utils"))]
pub fn encode_response(
    query_bytes: &[u8],
    answers: &[std::net::Ipv4Addr],
) -> Result<Vec<u8>, ProtoError> {
    use hickory_resolver::proto::rr::{rdata::A, Record};

    let query = Message::from_bytes(query_bytes)?;
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true);
    for q in query.queries() {
        response.add_query(q.clone());
        for ip in answers {
            response.add_answer(Record::from_rdata(q.name().clone(), 60, RData::A(A(*ip))));
        }
    }
    response.to_bytes()
}
