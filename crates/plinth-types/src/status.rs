//! HTTP status codes and WebSocket close codes.

pub const HTTP_200_OK: u16 = 200;
pub const HTTP_201_CREATED: u16 = 201;
pub const HTTP_202_ACCEPTED: u16 = 202;
pub const HTTP_204_NO_CONTENT: u16 = 204;
pub const HTTP_400_BAD_REQUEST: u16 = 400;
pub const HTTP_401_UNAUTHORIZED: u16 = 401;
pub const HTTP_403_FORBIDDEN: u16 = 403;
pub const HTTP_404_NOT_FOUND: u16 = 404;
pub const HTTP_405_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_413_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_429_TOO_MANY_REQUESTS: u16 = 429;
pub const HTTP_500_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_501_NOT_IMPLEMENTED: u16 = 501;

/// Normal closure; also used to reject a connection.
pub const WS_1000_NORMAL_CLOSURE: u16 = 1000;
pub const WS_1001_GOING_AWAY: u16 = 1001;
/// Connection dropped without a close frame.
pub const WS_1006_ABNORMAL_CLOSURE: u16 = 1006;
pub const WS_1008_POLICY_VIOLATION: u16 = 1008;
pub const WS_1011_INTERNAL_ERROR: u16 = 1011;
/// Server acting as a gateway received an invalid endpoint.
pub const WS_1014_BAD_GATEWAY: u16 = 1014;

/// Canonical reason phrase for the status codes the dispatch core emits.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown Status",
    }
}
