//! Request frame encoding (spec.md §4.2). Mirrors the 24-byte header
//! layout but with magic `0x80` and the status slot repurposed as the
//! vbucket id. Payload order is `extras | key | value`. Pure functions
//! over byte slices: no I/O, no allocation beyond the one output buffer.

use super::header::MAGIC_REQUEST;

/// Encode a full binary protocol request frame.
///
/// `vbucket` occupies the same header slot a response uses for `status`
/// (spec.md §4.2); the locator is responsible for setting it before the
/// frame is built (spec.md §4.6).
#[allow(clippy::too_many_arguments)]
pub fn encode_request(
    opcode: u8,
    vbucket: u16,
    opaque: u32,
    cas: u64,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) -> Vec<u8> {
    let body_len = (extras.len() + key.len() + value.len()) as u32;
    let mut buf = Vec::with_capacity(24 + body_len as usize);
    buf.push(MAGIC_REQUEST);
    buf.push(opcode);
    buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
    buf.push(extras.len() as u8);
    buf.push(0); // data type: always raw bytes on the wire today
    buf.extend_from_slice(&vbucket.to_be_bytes());
    buf.extend_from_slice(&body_len.to_be_bytes());
    buf.extend_from_slice(&opaque.to_be_bytes());
    buf.extend_from_slice(&cas.to_be_bytes());
    buf.extend_from_slice(extras);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_get_frame_matches_spec_vector() {
        // spec.md §8 scenario 1: GET "Hello", request_id = opaque = 0.
        let frame = encode_request(0x00, 0, 0, 0, b"", b"Hello", b"");
        let expect = vec![
            0x80, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x48, 0x65, 0x6c, 0x6c,
            0x6f,
        ];
        assert_eq!(frame, expect);
    }

    #[test]
    fn encodes_extras_key_value_in_order() {
        let frame = encode_request(0x01, 0x42, 7, 0, &[0xde, 0xad], b"k", b"v");
        // header (24) + extras(2) + key(1) + value(1)
        assert_eq!(frame.len(), 28);
        assert_eq!(&frame[24..26], &[0xde, 0xad]);
        assert_eq!(&frame[26..27], b"k");
        assert_eq!(&frame[27..28], b"v");
        // vbucket slot at offset 6..8
        assert_eq!(&frame[6..8], &0x42u16.to_be_bytes());
        // opaque slot at offset 12..16
        assert_eq!(&frame[12..16], &7u32.to_be_bytes());
    }
}
