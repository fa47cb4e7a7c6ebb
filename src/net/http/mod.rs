mod deadline;
mod parser;
mod response;

pub(crate) use deadline::RequestDeadline;
pub use parser::read_request;
pub use parser::SimpleHttpRequest;
pub(crate) use response::{write_json_error, write_response};
