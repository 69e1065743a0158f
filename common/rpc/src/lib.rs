//! Minimal Connect-style unary RPC dispatch on top of axum.
//!
//! Procedures are addressed as `/{package.Service}/{Method}` and exchange JSON
//! messages. Handler invocations run through an ordered [`InterceptorChain`].

pub mod code;
pub mod error;
pub mod interceptor;
pub mod request;
pub mod router;

pub use code::Code;
pub use error::{RpcError, RpcResult};
pub use interceptor::{unary_fn, Interceptor, InterceptorChain, Next, UnaryFn, UnaryHandler};
pub use request::{RpcRequest, RpcResponse};
pub use router::{RpcRouter, MAX_BODY_BYTES};
