/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = vec![];
    for c in string.chars() {
        // Handle the exception for how `\u{0000}` is represented
        let len: usize = if c == '\u{0000}' { 2 } else { c.len_utf8() };
        let code: u32 = c as u32;

        match len {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => push_three_bytes(&mut buffer, code),

            // Supplementary characters: main divergence from unicode
            _ => {
                let offset = code - 0x10000;
                push_three_bytes(&mut buffer, 0xD800 | (offset >> 10));
                push_three_bytes(&mut buffer, 0xDC00 | (offset & 0x3FF));
            }
        }
    }
    buffer
}

fn push_three_bytes(buffer: &mut Vec<u8>, code: u32) {
    buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
    buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
    buffer.push((code & 0x3F) as u8 | 0b1000_0000);
}

/// Decode modified UTF-8, returning `None` if the bytes are not a canonical encoding
///
/// Canonical means that [`encode_modified_utf8`] on the result gives back exactly the input, so
/// the following are all rejected:
///
///   - raw `0x00` bytes and bytes in `0xF0..=0xFF` (4-byte forms and invalid lead bytes)
///   - sequences cut short or with bad continuation bytes
///   - overlong encodings (other than `C0 80` for the null character)
///   - surrogates that are not part of a high-low pair
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut string = String::with_capacity(bytes.len());
    let mut idx = 0;

    while idx < bytes.len() {
        let lead = bytes[idx];
        match lead {
            0x01..=0x7F => {
                string.push(lead as char);
                idx += 1;
            }
            0xC0..=0xDF => {
                let code = decode_two_bytes(bytes.get(idx..idx + 2)?)?;
                string.push(char::from_u32(code)?);
                idx += 2;
            }
            0xE0..=0xEF => {
                let code = decode_three_bytes(bytes.get(idx..idx + 3)?)?;
                if (0xD800..0xDC00).contains(&code) {
                    let low = decode_three_bytes(bytes.get(idx + 3..idx + 6)?)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return None;
                    }
                    let supplementary = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                    string.push(char::from_u32(supplementary)?);
                    idx += 6;
                } else {
                    // Also rejects a stray low surrogate
                    string.push(char::from_u32(code)?);
                    idx += 3;
                }
            }
            _ => return None,
        }
    }

    Some(string)
}

fn is_continuation(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}

fn decode_two_bytes(bytes: &[u8]) -> Option<u32> {
    if !is_continuation(bytes[1]) {
        return None;
    }
    let code = (bytes[0] as u32 & 0x1F) << 6 | (bytes[1] as u32 & 0x3F);
    if code != 0 && code < 0x80 {
        return None;
    }
    Some(code)
}

fn decode_three_bytes(bytes: &[u8]) -> Option<u32> {
    if bytes[0] & 0b1111_0000 != 0b1110_0000
        || !is_continuation(bytes[1])
        || !is_continuation(bytes[2])
    {
        return None;
    }
    let code =
        (bytes[0] as u32 & 0x0F) << 12 | (bytes[1] as u32 & 0x3F) << 6 | (bytes[2] as u32 & 0x3F);
    if code < 0x800 {
        return None;
    }
    Some(code)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(
            decode_modified_utf8(&[97, 192, 128, 97]).as_deref(),
            Some("a\x00a")
        );
        assert_eq!(decode_modified_utf8(&[97, 0, 97]), None);
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(
            decode_modified_utf8(b"java/lang/Object").as_deref(),
            Some("java/lang/Object")
        );
    }

    #[test]
    fn two_and_three_byte_encodings() {
        assert_eq!(
            encode_modified_utf8("ĄǍǞ"),
            vec![196, 132, 199, 141, 199, 158]
        );
        assert_eq!(
            encode_modified_utf8("ऄअ"),
            vec![224, 164, 132, 224, 164, 133]
        );
        assert_eq!(
            decode_modified_utf8(&[196, 132, 224, 164, 133]).as_deref(),
            Some("Ąअ")
        );
    }

    #[test]
    fn supplementary_characters() {
        let encoded = vec![
            237, 160, 128, 237, 176, 128, 237, 172, 191, 237, 191, 191, 237, 175, 191, 237, 191,
            191,
        ];
        assert_eq!(encode_modified_utf8("\u{10000}\u{dffff}\u{10FFFF}"), encoded);
        assert_eq!(
            decode_modified_utf8(&encoded).as_deref(),
            Some("\u{10000}\u{dffff}\u{10FFFF}")
        );
    }

    #[test]
    fn rejects_non_canonical_input() {
        // 4-byte standard UTF-8 form
        assert_eq!(decode_modified_utf8(&[0xF0, 0x90, 0x80, 0x80]), None);
        // overlong 'A'
        assert_eq!(decode_modified_utf8(&[0xC1, 0x81]), None);
        // overlong in 3 bytes
        assert_eq!(decode_modified_utf8(&[0xE0, 0x81, 0x81]), None);
        // truncated
        assert_eq!(decode_modified_utf8(&[0xE0, 0xA4]), None);
        // bad continuation
        assert_eq!(decode_modified_utf8(&[0xC4, 0x04]), None);
        // lone high and low surrogates
        assert_eq!(decode_modified_utf8(&[237, 160, 128, 97]), None);
        assert_eq!(decode_modified_utf8(&[237, 176, 128]), None);
    }
}
