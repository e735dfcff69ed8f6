//! [`HttpClient`](super::HttpClient) decorators that attach an API key to
//! each request, either in the query string or in a header.

mod api_key;
mod url_param;

pub use api_key::ApiKey;
pub use url_param::UrlParam;
