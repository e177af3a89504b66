//! Tower layers making up the transport chain.

mod proxy_error;
mod retry;
mod trace;
mod user_agent;

pub use proxy_error::{ProxyErrorLayer, ProxyErrorService, is_html};
pub use retry::{RetryLayer, RetryService, jitter_from, jittered_backoff};
pub use trace::{TraceLayer, TraceService};
pub use user_agent::{UserAgentLayer, UserAgentService};
