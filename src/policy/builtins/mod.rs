//! Built-in `ControlPolicy` implementations (C7).

pub mod add_api_key_header;
pub mod backend_call;
pub mod client_api_key_auth;
pub mod compound;
pub mod conditional;
pub mod increment_integers;
pub mod leaked_api_key_detection;
pub mod model_name_replacement;
pub mod noop;
pub mod send_backend_request;
pub mod set_backend;
pub mod transaction_context_logging;

pub use add_api_key_header::{AddApiKeyHeader, AddApiKeyHeaderFromEnv};
pub use backend_call::{BackendCall, BackendCallSpec};
pub use client_api_key_auth::ClientApiKeyAuth;
pub use compound::CompoundPolicy;
pub use conditional::ConditionalPolicy;
pub use increment_integers::IncrementIntegers;
pub use leaked_api_key_detection::LeakedApiKeyDetection;
pub use model_name_replacement::ModelNameReplacement;
pub use noop::Noop;
pub use send_backend_request::SendBackendRequest;
pub use set_backend::SetBackend;
pub use transaction_context_logging::TransactionContextLogging;
