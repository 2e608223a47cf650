//! Shared test infrastructure for responder and feed integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use prost_types::Any;

use xds_dns::xds::{DiscoveryResponse, Resolution, ServiceEntry};
use xds_dns::{EntryStore, FeedAdapter, QueryResponder};

// --- Constants ---

pub const TYPE_URL: &str = "networking.istio.io/v1alpha3/ServiceEntry";
pub const TTL: u32 = 3600;

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and
/// stored as raw wire-format bytes, parsed back with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(io::Error::other)?;
        Ok(info)
    }
}

// --- ServiceEntry / feed helpers ---

/// Build a ServiceEntry wrapped as the control plane ships it.
pub fn service_entry(hosts: &[&str], addresses: &[&str], resolution: Resolution) -> Any {
    let entry = ServiceEntry {
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        addresses: addresses.iter().map(|a| a.to_string()).collect(),
        resolution: resolution as i32,
    };
    let name = hosts.first().copied().unwrap_or("unnamed");
    entry.to_resource(&format!("default/{name}"))
}

/// Build a discovery response carrying `resources`.
pub fn discovery_response(version: &str, resources: Vec<Any>) -> DiscoveryResponse {
    DiscoveryResponse {
        version_info: version.to_string(),
        resources,
        type_url: TYPE_URL.to_string(),
        nonce: format!("nonce-{version}"),
    }
}

/// A store, an adapter feeding it, and a responder reading it.
pub struct TestHarness {
    pub store: EntryStore,
    pub adapter: FeedAdapter,
    pub responder: QueryResponder,
}

impl TestHarness {
    pub fn new(default_address: Option<&str>) -> Self {
        let store = EntryStore::new();
        let default_address = default_address.map(|a| a.parse().unwrap());
        Self {
            adapter: FeedAdapter::new(store.clone(), default_address),
            responder: QueryResponder::new(store.clone(), TTL),
            store,
        }
    }

    /// Apply one discovery response.
    pub fn apply(&self, version: &str, resources: Vec<Any>) {
        self.adapter.handle_response(&discovery_response(version, resources));
    }
}

// --- Query/Request construction ---

fn query_message(id: u16) -> Message {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    msg
}

fn question(name: &str, record_type: RecordType) -> Query {
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    query
}

/// Build wire-format bytes for a DNS query with one question.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    build_multi_query_bytes(&[(name, record_type)], id)
}

/// Build wire-format bytes for a DNS query with any number of questions.
pub fn build_multi_query_bytes(questions: &[(&str, RecordType)], id: u16) -> Vec<u8> {
    let mut msg = query_message(id);
    for (name, record_type) in questions {
        msg.add_query(question(name, *record_type));
    }
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

pub fn client_src() -> SocketAddr {
    "10.0.0.1:12345".parse().unwrap()
}

/// Run raw query bytes through the responder and return the parsed response.
pub async fn execute_bytes(responder: &QueryResponder, bytes: &[u8]) -> Message {
    let request = Request::new(parse_message_request(bytes), client_src(), Protocol::Udp);
    let handler = TestResponseHandler::new();
    responder.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

/// Execute a single-question query through the responder.
pub async fn execute_query(
    responder: &QueryResponder,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    execute_bytes(responder, &build_query_bytes(name, record_type, id)).await
}

// --- Response helpers ---

/// Extract A addresses from a response, in answer order.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Extract AAAA addresses from a response, in answer order.
pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert the response succeeded with exactly the expected A records, in order.
pub fn assert_a_response(msg: &Message, expected: &[&str]) {
    assert_response_code(msg, ResponseCode::NoError);
    let expected: Vec<Ipv4Addr> = expected.iter().map(|ip| ip.parse().unwrap()).collect();
    assert_eq!(extract_a_ips(msg), expected, "A records mismatch");
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}
