//! Hickory request handler answering address queries from the [`EntryStore`].

use async_trait::async_trait;
use hickory_proto::op::{Header, LowerQuery, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::net::IpAddr;
use tracing::{debug, trace, warn};

use crate::metrics::{self, QueryResult, Timer};
use crate::state::EntryStore;

/// Outcome of answering the questions of one request.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Response code for the whole message.
    pub response_code: ResponseCode,
    /// Answer records, in question order then address order.
    pub records: Vec<Record>,
}

/// Answers `A` and `AAAA` questions for names in the entry store.
#[derive(Debug, Clone)]
pub struct QueryResponder {
    store: EntryStore,
    ttl: u32,
}

impl QueryResponder {
    /// Create a responder over `store` answering with the given TTL.
    pub fn new(store: EntryStore, ttl: u32) -> Self {
        Self { store, ttl }
    }

    /// Answer every question of a request.
    ///
    /// No questions is a server failure. Unsupported question types add no
    /// answers. No answers at all is NXDOMAIN.
    pub fn answer(&self, queries: &[LowerQuery]) -> Answer {
        if queries.is_empty() {
            debug!("request carries no questions");
            return Answer {
                response_code: ResponseCode::ServFail,
                records: Vec::new(),
            };
        }

        let mut records = Vec::new();
        for query in queries {
            let rtype = query.query_type();
            if !matches!(rtype, RecordType::A | RecordType::AAAA) {
                trace!(name = %query.name(), rtype = ?rtype, "ignoring unsupported question");
                continue;
            }

            let name = query.name().to_string();
            let Some(addresses) = self.store.resolve(&name) else {
                debug!(name = %name, rtype = ?rtype, "no entry for name");
                continue;
            };

            debug!(name = %name, addresses = ?addresses, "found entry");
            let owner = Name::from(query.name().clone());
            records.extend(
                addresses
                    .iter()
                    .filter_map(|ip| self.address_record(&owner, rtype, *ip)),
            );
        }

        let response_code = if records.is_empty() {
            ResponseCode::NXDomain
        } else {
            ResponseCode::NoError
        };

        Answer {
            response_code,
            records,
        }
    }

    /// Build an answer record when the address family matches the question.
    fn address_record(&self, owner: &Name, rtype: RecordType, ip: IpAddr) -> Option<Record> {
        let rdata = match (rtype, ip) {
            (RecordType::A, IpAddr::V4(v4)) => RData::A(A::from(v4)),
            (RecordType::AAAA, IpAddr::V6(v6)) => RData::AAAA(AAAA::from(v6)),
            _ => return None,
        };
        let mut record = Record::from_rdata(owner.clone(), self.ttl, rdata);
        record.set_dns_class(DNSClass::IN);
        Some(record)
    }
}

#[async_trait]
impl RequestHandler for QueryResponder {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();
        let queries = request.queries();
        let rtype_str = queries
            .first()
            .map(|q| format!("{:?}", q.query_type()))
            .unwrap_or_else(|| "none".to_string());

        let answer = self.answer(queries);

        let result = match answer.response_code {
            ResponseCode::NoError => {
                metrics::record_answers_returned(answer.records.len());
                QueryResult::Success
            }
            ResponseCode::NXDomain => QueryResult::NxDomain,
            _ => QueryResult::ServFail,
        };
        metrics::record_query(&rtype_str, result, timer.elapsed());

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(answer.response_code);

        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            answer.records.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                warn!(src = %request.src(), error = %e, "failed to send DNS response");
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}
