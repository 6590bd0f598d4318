//! Intel HEX parser.
//!
//! Parses a HEX file into a flash byte image. Data records are collected
//! as chunks and merged at the end, which catches overlaps. Extended
//! segment (type 02) and extended linear (type 04) records widen the
//! addresses; data above 0x800000 is RAM-space in the avr-gcc convention
//! and is ignored.

use thiserror::Error;

use super::{merge_chunks, Chunk};

/// HEX parsing failure, with the 1-based line it was found on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("line {line}: line is too short")]
    LineTooShort { line: usize },

    #[error("line {line}: invalid start code (':' expected)")]
    BadStartCode { line: usize },

    #[error("line {line}: odd number of hex digits")]
    OddDigitCount { line: usize },

    #[error("line {line}: invalid hex digit")]
    BadDigit { line: usize },

    #[error("line {line}: checksum mismatch")]
    ChecksumMismatch { line: usize },

    #[error("line {line}: invalid byte count")]
    BadByteCount { line: usize },

    #[error("line {line}: {reason}")]
    BadRecord { line: usize, reason: &'static str },

    #[error("line {line}: end of file record not in the last line")]
    DataAfterEof { line: usize },

    #[error("no data")]
    NoData,

    #[error("data overlap at {addr:#x}")]
    Overlap { addr: u32 },
}

/// Addresses at or above this are data-space images, not flash.
const RAM_SPACE_START: u32 = 0x80_0000;

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Parse HEX text into a flash byte image.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, HexError> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut ex_addr_mask: u32 = 0;
    let mut eof = false;

    for (index, raw_line) in text.lines().enumerate() {
        let line = index + 1;
        let record = raw_line.trim_end_matches('\r');
        if record.is_empty() {
            continue;
        }
        if eof {
            return Err(HexError::DataAfterEof { line });
        }

        if record.len() < 11 {
            return Err(HexError::LineTooShort { line });
        }
        let bytes_text = match record.strip_prefix(':') {
            Some(rest) => rest.as_bytes(),
            None => return Err(HexError::BadStartCode { line }),
        };
        if bytes_text.len() % 2 != 0 {
            return Err(HexError::OddDigitCount { line });
        }

        let mut bytes = Vec::with_capacity(bytes_text.len() / 2);
        for pair in bytes_text.chunks_exact(2) {
            let hi = hex_digit(pair[0]).ok_or(HexError::BadDigit { line })?;
            let lo = hex_digit(pair[1]).ok_or(HexError::BadDigit { line })?;
            bytes.push((hi << 4) | lo);
        }

        let checksum = bytes
            .iter()
            .fold(0u8, |sum, &byte| sum.wrapping_add(byte));
        if checksum != 0 {
            return Err(HexError::ChecksumMismatch { line });
        }

        let byte_count = bytes[0] as usize;
        if byte_count != bytes.len() - 5 {
            return Err(HexError::BadByteCount { line });
        }

        let address = (u32::from(bytes[1]) << 8) | u32::from(bytes[2]);
        match bytes[3] {
            0x00 => {
                // data
                let data_addr = address | ex_addr_mask;
                if data_addr >= RAM_SPACE_START {
                    continue; // RAM data, ignore
                }
                chunks.push(Chunk {
                    addr: data_addr,
                    data: bytes[4..4 + byte_count].to_vec(),
                });
            }
            0x01 => {
                // end of file
                if byte_count != 0 {
                    return Err(HexError::BadRecord {
                        line,
                        reason: "unexpected data in end of file record",
                    });
                }
                eof = true;
            }
            0x02 => {
                // extended segment address
                if byte_count != 2 {
                    return Err(HexError::BadRecord {
                        line,
                        reason: "invalid byte count for extended segment address record",
                    });
                }
                if address != 0 {
                    return Err(HexError::BadRecord {
                        line,
                        reason: "address must be 0000 for extended segment address record",
                    });
                }
                if bytes[5] & 0xF != 0 {
                    return Err(HexError::BadRecord {
                        line,
                        reason: "extended segment address least-significant digit must be 0",
                    });
                }
                ex_addr_mask &= !0x000F_FFF0;
                ex_addr_mask |= ((u32::from(bytes[4]) << 8) | u32::from(bytes[5])) << 4;
            }
            0x03 => {
                // start segment address, ignored
            }
            0x04 => {
                // extended linear address
                if byte_count != 2 {
                    return Err(HexError::BadRecord {
                        line,
                        reason: "invalid byte count for extended linear address record",
                    });
                }
                if address != 0 {
                    return Err(HexError::BadRecord {
                        line,
                        reason: "address must be 0000 for extended linear address record",
                    });
                }
                ex_addr_mask &= 0x0000_FFFF;
                ex_addr_mask |= ((u32::from(bytes[4]) << 8) | u32::from(bytes[5])) << 16;
            }
            0x05 => {
                // start linear address, ignored
            }
            _ => {
                return Err(HexError::BadRecord {
                    line,
                    reason: "invalid record type",
                });
            }
        }
    }

    if chunks.is_empty() {
        return Err(HexError::NoData);
    }
    merge_chunks(chunks).map_err(|overlap| HexError::Overlap { addr: overlap.addr })
}

#[cfg(test)]
mod tests {
    use super::*;

    // :020000000C94E6 is "0x0C 0x94" at address 0 (RJMP-style vector entry)
    const SIMPLE: &str = ":020000000C945E\n:00000001FF\n";

    #[test]
    fn test_simple_record() {
        let image = parse_hex(SIMPLE).unwrap();
        assert_eq!(image, vec![0x0C, 0x94]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let image = parse_hex(":020000000C945E\r\n:00000001FF\r\n").unwrap();
        assert_eq!(image, vec![0x0C, 0x94]);
    }

    #[test]
    fn test_gap_is_padded_with_erased_flash() {
        // two bytes at 0, two bytes at 6
        let text = ":020000000102FB\n:020006000304F1\n:00000001FF\n";
        let image = parse_hex(text).unwrap();
        assert_eq!(image, vec![0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFF, 0x03, 0x04]);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let err = parse_hex(":020000000C945F\n").unwrap_err();
        assert_eq!(err, HexError::ChecksumMismatch { line: 1 });
    }

    #[test]
    fn test_bad_start_code() {
        let err = parse_hex("020000000C945E00\n").unwrap_err();
        assert_eq!(err, HexError::BadStartCode { line: 1 });
    }

    #[test]
    fn test_bad_digit() {
        let err = parse_hex(":02000000XY945E\n").unwrap_err();
        assert_eq!(err, HexError::BadDigit { line: 1 });
    }

    #[test]
    fn test_short_line() {
        let err = parse_hex(":0000\n").unwrap_err();
        assert_eq!(err, HexError::LineTooShort { line: 1 });
    }

    #[test]
    fn test_data_after_eof_rejected() {
        let text = ":00000001FF\n:020000000C945E\n";
        let err = parse_hex(text).unwrap_err();
        assert_eq!(err, HexError::DataAfterEof { line: 2 });
    }

    #[test]
    fn test_extended_linear_address() {
        // place two bytes at 0x10000
        let text = ":020000040001F9\n:020000000A0BE9\n:00000001FF\n";
        let image = parse_hex(text).unwrap();
        assert_eq!(image.len(), 0x10002);
        assert_eq!(image[0x10000], 0x0A);
        assert_eq!(image[0x10001], 0x0B);
        assert_eq!(image[0], 0xFF);
    }

    #[test]
    fn test_extended_segment_address() {
        // segment 0x1000 shifts data by 0x10000
        let text = ":020000021000EC\n:020000000A0BE9\n:00000001FF\n";
        let image = parse_hex(text).unwrap();
        assert_eq!(image.len(), 0x10002);
        assert_eq!(image[0x10000], 0x0A);
    }

    #[test]
    fn test_ram_space_records_ignored() {
        // data at 0x800100 (data-space image) plus real flash data
        let text = ":020000040080 7A\n:02010000AABB98\n:020000040000FA\n:020000000C945E\n:00000001FF\n";
        let text = text.replace(' ', "");
        let image = parse_hex(&text).unwrap();
        assert_eq!(image, vec![0x0C, 0x94]);
    }

    #[test]
    fn test_overlap_rejected() {
        let text = ":020000000102FB\n:020001000304F6\n:00000001FF\n";
        let err = parse_hex(text).unwrap_err();
        assert_eq!(err, HexError::Overlap { addr: 1 });
    }

    #[test]
    fn test_no_data_rejected() {
        assert_eq!(parse_hex(":00000001FF\n").unwrap_err(), HexError::NoData);
        assert_eq!(parse_hex("").unwrap_err(), HexError::NoData);
    }
}
