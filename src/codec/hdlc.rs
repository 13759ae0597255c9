//! HDLC byte stuffing
//!
//! On the HDLC-carrier encapsulation, control characters and the two HDLC
//! metacharacters are escaped before they hit the wire. Which control
//! characters need escaping is governed by a 32-bit async control character
//! map: bit `c` set means byte `c` (for `c < 0x20`) must be stuffed.
//!
//! The escape sequence is `0x7d` followed by the byte XORed with `0x20`.
//! Neither function deals in frame delimiters; [`unescape`] tolerates and
//! skips `0x7e` flags so a delimited frame can be fed to it directly.

use bytes::{BufMut, BytesMut};

/// Escape byte
const HDLC_ESC: u8 = 0x7d;
/// Frame delimiter flag
const HDLC_FLAG: u8 = 0x7e;

/// Asyncmap in effect before LCP negotiation completes: every control
/// character is escaped.
pub const ASYNCMAP_LCP: u32 = 0xffff_ffff;

fn needs_escape(c: u8, asyncmap: u32) -> bool {
    (c < 0x20 && asyncmap & (1 << c) != 0) || c == HDLC_ESC || c == HDLC_FLAG
}

/// Appends `data` to `buf` in byte-stuffed form
///
/// Bytes that do not need escaping pass through verbatim.
pub fn escape_into(buf: &mut BytesMut, data: &[u8], asyncmap: u32) {
    buf.reserve(data.len());
    for &c in data {
        if needs_escape(c, asyncmap) {
            buf.put_u8(HDLC_ESC);
            buf.put_u8(c ^ 0x20);
        } else {
            buf.put_u8(c);
        }
    }
}

/// Byte-stuffs `data` under the given asyncmap
pub fn escape(data: &[u8], asyncmap: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(data.len());
    escape_into(&mut buf, data, asyncmap);
    buf
}

/// Reverses HDLC byte stuffing
///
/// `0x7e` flags are skipped, an escape byte XORs the byte after it with
/// `0x20`. A trailing unpaired escape is dropped. Unescaping does not need
/// the asyncmap: every `0x7d`-prefixed pair decodes the same way no matter
/// which map produced it.
pub fn unescape(data: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(data.len());
    let mut escaped = false;
    for &c in data {
        if escaped {
            buf.put_u8(c ^ 0x20);
            escaped = false;
        } else if c == HDLC_ESC {
            escaped = true;
        } else if c != HDLC_FLAG {
            buf.put_u8(c);
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_metachars_regardless_of_map() {
        assert_eq!(&escape(&[0x7d], 0)[..], &[0x7d, 0x5d]);
        assert_eq!(&escape(&[0x7e], 0)[..], &[0x7d, 0x5e]);
    }

    #[test]
    fn control_chars_follow_the_map() {
        // Bit 3 set: 0x03 is stuffed, 0x04 is not.
        let out = escape(&[0x03, 0x04], 1 << 3);
        assert_eq!(&out[..], &[0x7d, 0x23, 0x04]);
        // Map zero: control characters pass through.
        assert_eq!(&escape(&[0x03, 0x04], 0)[..], &[0x03, 0x04]);
    }

    #[test]
    fn unescape_skips_flags() {
        let out = unescape(&[0x7e, 0x45, 0x7d, 0x5e, 0x01, 0x7e]);
        assert_eq!(&out[..], &[0x45, 0x7e, 0x01]);
    }

    #[test]
    fn unescape_drops_trailing_escape() {
        assert_eq!(&unescape(&[0x45, 0x7d])[..], &[0x45]);
    }

    #[test]
    fn roundtrip_random_buffers() {
        for i in 0..64 {
            let map: u32 = rand::random();
            let len = 1 + (i * 7) % 96;
            let data: Vec<u8> = (0..len).map(|_| rand::random()).collect();
            let cooked = unescape(&escape(&data, map));
            assert_eq!(&cooked[..], &data[..], "map 0x{:08x}", map);
        }
    }

    #[test]
    fn roundtrip_all_bytes_under_full_map() {
        let data: Vec<u8> = (0..=255).collect();
        let escaped = escape(&data, ASYNCMAP_LCP);
        assert_eq!(&unescape(&escaped)[..], &data[..]);
    }
}
