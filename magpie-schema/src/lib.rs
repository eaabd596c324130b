pub mod catalog;
pub mod check;

pub use catalog::{
    GraphqlError, PageInfo, RateLimitInfo, RawRecord, RecordKind, SearchData, SearchEnvelope,
    SearchPage, SearchRequest, SearchVariables,
};
pub use check::CheckPayload;
