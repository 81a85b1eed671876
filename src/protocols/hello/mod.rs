//! Hello protocol.
//!
//! The fixture does not parse requests. Whatever arrives in one read is
//! answered with the same fixed response:
//!
//! ```text
//! Request:  <any bytes>
//! Response: HTTP/1.1 200 OK\nContent-Length: 12\n\nHello world!
//! ```
//!
//! Lines end in a bare `\n`, not `\r\n`. Benchmark clients count on the exact
//! byte sequence, so it must not be "fixed" into strict HTTP framing.

use bytes::Bytes;

/// The response written after every read.
pub const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\nContent-Length: 12\n\nHello world!";

/// The request the load generators send.
pub const REQUEST: &[u8] = b"Hello!!!";

/// Shared, read-only handle to the response payload.
pub fn response() -> Bytes {
    Bytes::from_static(RESPONSE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_bytes() {
        assert_eq!(RESPONSE.len(), 48);
        assert!(!RESPONSE.windows(2).any(|w| w == b"\r\n"));
        assert!(RESPONSE.starts_with(b"HTTP/1.1 200 OK\n"));
    }

    #[test]
    fn test_content_length_matches_body() {
        let split = RESPONSE.windows(2).position(|w| w == b"\n\n").unwrap();
        let body = &RESPONSE[split + 2..];
        assert_eq!(body, b"Hello world!");
        assert_eq!(body.len(), 12);
    }

    #[test]
    fn test_shared_payload_is_static() {
        let a = response();
        let b = a.clone();
        assert_eq!(a.as_ptr(), b.as_ptr());
        assert_eq!(&a[..], RESPONSE);
    }
}
