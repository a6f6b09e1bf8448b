//! Decoding the RFC 7541 Appendix C request and response examples,
//! including dynamic table evolution and eviction.

use h2_mux::{HeaderField, HpackDecoder};

fn field(name: &str, value: &str) -> HeaderField {
    HeaderField::new(name, value)
}

#[test]
fn test_c3_requests_without_huffman() {
    let mut decoder = HpackDecoder::new(4096);

    // C.3.1
    let mut block = vec![0x82, 0x86, 0x84, 0x41, 0x0f];
    block.extend_from_slice(b"www.example.com");
    let headers = decoder.decode(&block).unwrap();
    assert_eq!(
        headers,
        vec![
            field(":method", "GET"),
            field(":scheme", "http"),
            field(":path", "/"),
            field(":authority", "www.example.com"),
        ]
    );
    assert_eq!(decoder.table().len(), 1);
    assert_eq!(decoder.table().size(), 57);

    // C.3.2
    let mut block = vec![0x82, 0x86, 0x84, 0xbe, 0x58, 0x08];
    block.extend_from_slice(b"no-cache");
    let headers = decoder.decode(&block).unwrap();
    assert_eq!(
        headers,
        vec![
            field(":method", "GET"),
            field(":scheme", "http"),
            field(":path", "/"),
            field(":authority", "www.example.com"),
            field("cache-control", "no-cache"),
        ]
    );
    assert_eq!(decoder.table().len(), 2);
    assert_eq!(decoder.table().size(), 110);

    // C.3.3
    let mut block = vec![0x82, 0x87, 0x85, 0xbf, 0x40, 0x0a];
    block.extend_from_slice(b"custom-key");
    block.push(0x0c);
    block.extend_from_slice(b"custom-value");
    let headers = decoder.decode(&block).unwrap();
    assert_eq!(
        headers,
        vec![
            field(":method", "GET"),
            field(":scheme", "https"),
            field(":path", "/index.html"),
            field(":authority", "www.example.com"),
            field("custom-key", "custom-value"),
        ]
    );
    assert_eq!(decoder.table().len(), 3);
    assert_eq!(decoder.table().size(), 164);
    assert_eq!(decoder.table().get(0).unwrap().name, b"custom-key");
}

#[test]
fn test_c4_requests_with_huffman() {
    let mut decoder = HpackDecoder::new(4096);

    // C.4.1
    let block = [
        0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab,
        0x90, 0xf4, 0xff,
    ];
    let headers = decoder.decode(&block).unwrap();
    assert_eq!(headers[3], field(":authority", "www.example.com"));
    assert_eq!(decoder.table().size(), 57);

    // C.4.2
    let block = [
        0x82, 0x86, 0x84, 0xbe, 0x58, 0x86, 0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf,
    ];
    let headers = decoder.decode(&block).unwrap();
    assert_eq!(headers[4], field("cache-control", "no-cache"));
    assert_eq!(decoder.table().size(), 110);

    // C.4.3
    let block = [
        0x82, 0x87, 0x85, 0xbf, 0x40, 0x88, 0x25, 0xa8, 0x49, 0xe9, 0x5b, 0xa9, 0x7d, 0x7f,
        0x89, 0x25, 0xa8, 0x49, 0xe9, 0x5b, 0xb8, 0xe8, 0xb4, 0xbf,
    ];
    let headers = decoder.decode(&block).unwrap();
    assert_eq!(headers[4], field("custom-key", "custom-value"));
    assert_eq!(decoder.table().size(), 164);
}

#[test]
fn test_c5_responses_evict_under_small_table() {
    // The example negotiates a 256-byte table, which holds exactly the four
    // response headers of the first block.
    let mut decoder = HpackDecoder::new(256);

    // C.5.1
    let mut block = vec![0x48, 0x03];
    block.extend_from_slice(b"302");
    block.extend_from_slice(&[0x58, 0x07]);
    block.extend_from_slice(b"private");
    block.extend_from_slice(&[0x61, 0x1d]);
    block.extend_from_slice(b"Mon, 21 Oct 2013 20:13:21 GMT");
    block.extend_from_slice(&[0x6e, 0x17]);
    block.extend_from_slice(b"https://www.example.com");
    let headers = decoder.decode(&block).unwrap();
    assert_eq!(
        headers,
        vec![
            field(":status", "302"),
            field("cache-control", "private"),
            field("date", "Mon, 21 Oct 2013 20:13:21 GMT"),
            field("location", "https://www.example.com"),
        ]
    );
    assert_eq!(decoder.table().len(), 4);
    assert_eq!(decoder.table().size(), 222);

    // C.5.2: inserting ":status 307" overflows 256 and evicts ":status 302".
    let mut block = vec![0x48, 0x03];
    block.extend_from_slice(b"307");
    block.extend_from_slice(&[0xc1, 0xc0, 0xbf]);
    let headers = decoder.decode(&block).unwrap();
    assert_eq!(
        headers,
        vec![
            field(":status", "307"),
            field("cache-control", "private"),
            field("date", "Mon, 21 Oct 2013 20:13:21 GMT"),
            field("location", "https://www.example.com"),
        ]
    );
    assert_eq!(decoder.table().len(), 4);
    assert_eq!(decoder.table().size(), 222);
    assert_eq!(decoder.table().get(0).unwrap().value, b"307");
    assert!(decoder
        .table()
        .get(3)
        .is_some_and(|f| f.name == b"cache-control"));
}

#[test]
fn test_desync_surfaces_as_fatal_error() {
    let mut decoder = HpackDecoder::new(4096);
    // A dynamic reference before anything was inserted.
    let err = decoder.decode(&[0xbe]).unwrap_err();
    assert!(err.is_connection_fatal());
}
