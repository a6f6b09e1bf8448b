//! Encoder output checked byte-for-byte against the Huffman-coded request
//! examples of RFC 7541 Appendix C.4, plus table-synchronization cases.

use h2_mux::{HeaderField, HpackDecoder, HpackEncoder};

fn field(name: &str, value: &str) -> HeaderField {
    HeaderField::new(name, value)
}

#[test]
fn test_c4_request_series_byte_exact() {
    let mut encoder = HpackEncoder::new(4096);

    // C.4.1: the :authority value Huffman-compresses from 15 to 12 bytes.
    let block = encoder.encode_to_vec(&[
        field(":method", "GET"),
        field(":scheme", "http"),
        field(":path", "/"),
        field(":authority", "www.example.com"),
    ]);
    assert_eq!(
        block,
        [
            0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab,
            0x90, 0xf4, 0xff,
        ]
    );

    // C.4.2: :authority now resolves from the dynamic table (index 62).
    let block = encoder.encode_to_vec(&[
        field(":method", "GET"),
        field(":scheme", "http"),
        field(":path", "/"),
        field(":authority", "www.example.com"),
        field("cache-control", "no-cache"),
    ]);
    assert_eq!(
        block,
        [0x82, 0x86, 0x84, 0xbe, 0x58, 0x86, 0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf]
    );

    // C.4.3: custom-key is a brand new name, Huffman-coded both ways.
    let block = encoder.encode_to_vec(&[
        field(":method", "GET"),
        field(":scheme", "https"),
        field(":path", "/index.html"),
        field(":authority", "www.example.com"),
        field("custom-key", "custom-value"),
    ]);
    assert_eq!(
        block,
        [
            0x82, 0x87, 0x85, 0xbf, 0x40, 0x88, 0x25, 0xa8, 0x49, 0xe9, 0x5b, 0xa9, 0x7d, 0x7f,
            0x89, 0x25, 0xa8, 0x49, 0xe9, 0x5b, 0xb8, 0xe8, 0xb4, 0xbf,
        ]
    );
}

#[test]
fn test_encoder_and_decoder_stay_synchronized_under_eviction() {
    // A table this small holds only one entry at a time, so every block
    // churns the table on both sides.
    let mut encoder = HpackEncoder::new(64);
    let mut decoder = HpackDecoder::new(64);

    for i in 0..20 {
        let headers = vec![
            field(":method", "GET"),
            HeaderField::new("x-seq", format!("value-{i}")),
        ];
        let block = encoder.encode_to_vec(&headers);
        assert_eq!(decoder.decode(&block).unwrap(), headers);
        assert!(decoder.table().len() <= 1);
    }
}

#[test]
fn test_repeated_lists_compress_to_indexed_references() {
    let mut encoder = HpackEncoder::new(4096);
    let headers = vec![
        field(":method", "POST"),
        field("content-type", "application/json"),
        field("x-api-key", "0123456789abcdef"),
    ];
    let first = encoder.encode_to_vec(&headers);
    let second = encoder.encode_to_vec(&headers);
    // Everything resolves from tables the second time: one byte per field.
    assert_eq!(second.len(), 3);
    assert!(second.len() < first.len());

    let mut decoder = HpackDecoder::new(4096);
    assert_eq!(decoder.decode(&first).unwrap(), headers);
    assert_eq!(decoder.decode(&second).unwrap(), headers);
}

#[test]
fn test_sensitive_headers_never_enter_either_table() {
    let mut encoder = HpackEncoder::new(4096);
    let mut decoder = HpackDecoder::new(4096);
    let headers = vec![
        field(":method", "GET"),
        HeaderField::sensitive("authorization", "Bearer top-secret"),
    ];
    for _ in 0..2 {
        let block = encoder.encode_to_vec(&headers);
        let decoded = decoder.decode(&block).unwrap();
        assert_eq!(decoded, headers);
        assert!(decoded[1].sensitive);
        assert_eq!(decoder.table().len(), 0);
    }
}
