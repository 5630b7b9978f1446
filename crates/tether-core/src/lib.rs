//! Protocol core: session ids, the JSON-RPC envelope, and the handler seam
//! the routing layer calls through.

pub mod handler;
pub mod ids;
pub mod rpc;

pub use handler::{EventSink, HandlerError, RequestCtx, RequestHandler};
pub use ids::SessionId;
pub use rpc::{JsonRpcRequest, JsonRpcResponse, RpcErrorObject, RpcPayload};
