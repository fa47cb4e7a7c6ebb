pub mod retry;

pub use retry::{RetryHandle, RetryPolicy};
