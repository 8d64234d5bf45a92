//! Method classification used by the write path and the admission policy.

use http::Method;

/// Returns true for the verbs that define a meaning for an enclosed payload.
///
/// Only these methods receive an explicit `content-length: 0` when the body is
/// empty; every other method omits the length header entirely.
pub fn expects_payload(method: &Method) -> bool {
    method == Method::PUT || method == Method::POST || method == Method::PATCH
}

/// Default idempotency used when the caller does not declare one.
pub fn is_idempotent_by_default(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

/// Returns true if writing this method must stop further reuse of the socket.
///
/// HEAD responses from misbehaving servers may carry a body, and CONNECT
/// hands the socket to the caller.
pub fn forces_reset(method: &Method) -> bool {
    method == Method::HEAD || method == Method::CONNECT
}
