#![forbid(unsafe_code)]
#![doc = r#"
Luthien Control

An intercepting reverse proxy for OpenAI-compatible chat-completion APIs.
Client requests are decoded into a `Transaction`, run through a
configurable tree of `ControlPolicy` instances that may inspect,
transform, redirect, block, or synthesize the response, and the result
is relayed back to the client — buffered or as a Server-Sent Events
stream.

Modules
- `openai`: OpenAI chat-completions request/response/streaming types.
- `transaction`: the per-request state object threaded through policies.
- `value`: path-addressed value resolution over a transaction.
- `condition`: serializable boolean predicates over a transaction.
- `streaming`: the unified streaming-iterator abstraction and SSE framing.
- `policy`: the `ControlPolicy` contract, error family, and built-ins.
- `registry`: policy type-tag registry and config-tree loader.
- `repository`: credential and policy persistence interfaces + backends.
- `settings`: read-only application configuration surface.
- `orchestrator`: per-request control flow tying the above together.
- `server`: the actix-web host (routing, handlers).
"#]

pub mod condition;
pub mod openai;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod repository;
pub mod server;
pub mod settings;
pub mod streaming;
pub mod transaction;
pub mod util;
pub mod value;

pub use crate::condition::Condition;
pub use crate::orchestrator::Orchestrator;
pub use crate::policy::{ControlPolicy, ControlPolicyError};
pub use crate::registry::PolicyRegistry;
pub use crate::settings::Settings;
pub use crate::transaction::Transaction;
