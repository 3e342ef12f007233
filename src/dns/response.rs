//! Construction of locally generated DNS responses.
//!
//! Every message built here is correlated to the query it answers: same
//! transaction id, same opcode, the question section copied over and the
//! RD/CD flags echoed back.

use std::net::IpAddr;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{Name, RData, Record};

use crate::error::{Error, Result};

/// TTL, in seconds, of synthesized override records.
pub const OVERRIDE_TTL: u32 = 60;

/// Build an empty response header that replies to `query`.
pub fn reply_to(query: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_checking_disabled(query.checking_disabled())
        .set_response_code(ResponseCode::NoError);

    for q in query.queries() {
        response.add_query(q.clone());
    }

    response
}

/// Build a successful answer holding a single address record for `name`.
///
/// IPv4 targets produce an A record, IPv6 targets an AAAA record. A target
/// that is not an IP literal cannot be encoded and yields
/// [`Error::MalformedOverride`].
pub fn override_answer(query: &Message, name: &Name, target: &str, ttl: u32) -> Result<Message> {
    let addr: IpAddr = target.parse().map_err(|source| Error::MalformedOverride {
        target: target.to_string(),
        source,
    })?;

    let rdata = match addr {
        IpAddr::V4(v4) => RData::A(A(v4)),
        IpAddr::V6(v6) => RData::AAAA(AAAA(v6)),
    };

    let mut response = reply_to(query);
    response.add_answer(Record::from_rdata(name.clone(), ttl, rdata));
    Ok(response)
}

/// Build a SERVFAIL response with no answers.
pub fn server_failure(query: &Message) -> Message {
    let mut response = reply_to(query);
    response.set_response_code(ResponseCode::ServFail);
    response
}

/// Take an upstream response as-is, only forcing the transaction id back
/// to the one the requester used.
pub fn pass_through(query: &Message, mut upstream: Message) -> Message {
    upstream.set_id(query.id());
    upstream
}
