pub mod executor;
pub mod graphql;
pub mod guard;
pub mod http;

pub use executor::{ExecutorError, ExecutorResponse, HttpExecutor, OutboundRequest};
pub use http::ReqwestExecutor;
