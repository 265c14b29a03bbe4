#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Integration tests for the BLTE writer and reader
//!
//! Covers round trips across block policies, content key invariance under
//! chunking, lenient decoding of blocks whose key is unknown, and records
//! reloaded from their encoding spec.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use proptest::prelude::*;
use tactkit_crypto::{ContentKey, MemoryKeyStore, TactKey};
use tactkit_formats::blte::{
    BlockEncryption, BlteReader, BlteWriter, ChunkInfo, ContentRecord, EncodingMap, EncodingSpec,
    decode,
};

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + i / 251) % 256) as u8).collect()
}

#[test]
fn blte_round_trip_lengths_and_policies() {
    let policies = [
        EncodingMap::None,
        EncodingMap::zlib(1),
        EncodingMap::zlib(9),
        EncodingMap::mpq(9),
    ];

    for len in [0usize, 1, 19, 20, 1_048_576] {
        let data = content(len);
        for map in policies {
            let encoded = BlteWriter::encode(&data, map).unwrap();
            assert_eq!(encoded.record.decompressed_size, len as u64);
            assert_eq!(encoded.record.encoded_size, encoded.data.len() as u64);
            assert_eq!(encoded.record.content_key, ContentKey::from_data(&data));

            let decoded = decode(&encoded.data, Arc::new(tactkit_crypto::NoKeys)).unwrap();
            assert!(decoded == data, "{map:?} at {len} bytes");
        }
    }
}

#[test]
fn blte_content_key_ignores_chunking() {
    let data = content(10_000);
    let single = BlteWriter::encode(&data, EncodingMap::zlib(9)).unwrap();
    let chunked = BlteWriter::encode_chunked(&data, EncodingMap::zlib(9), 2500).unwrap();

    assert_eq!(single.record.content_key, chunked.record.content_key);
    assert_ne!(single.record.encoding_key, chunked.record.encoding_key);
    assert_eq!(chunked.record.encoding_spec, "b:{2K*=z,2K*=z,2K*=z,2K*=z}");

    let reader = BlteReader::from_bytes(chunked.data).unwrap();
    assert_eq!(reader.block_count(), 4);
    assert_eq!(reader.decode_all().unwrap(), data);
}

#[test]
fn blte_encoding_key_of_chunked_stream_covers_header_only() {
    let data = content(10_000);
    let chunked = BlteWriter::encode_chunked(&data, EncodingMap::None, 2500).unwrap();
    let header_size = u32::from_be_bytes(chunked.data[4..8].try_into().unwrap()) as usize;
    assert_eq!(header_size, 12 + 24 * 4);
    assert_eq!(
        chunked.record.encoding_key.as_bytes(),
        &md5::compute(&chunked.data[..header_size]).0
    );

    let single = BlteWriter::encode(&data, EncodingMap::None).unwrap();
    assert_eq!(
        single.record.encoding_key.as_bytes(),
        &md5::compute(&single.data).0
    );
}

#[test]
fn blte_unknown_key_decodes_to_declared_zeros() {
    let mut block = vec![b'E', 8];
    block.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
    block.push(4);
    block.extend_from_slice(&[0xA0, 0xA1, 0xA2, 0xA3]);
    block.push(b'S');
    block.extend_from_slice(&[0x5C; 40]);

    let chunk = ChunkInfo::for_chunk(&block, 64);
    let mut stream = b"BLTE".to_vec();
    stream.extend_from_slice(&36u32.to_be_bytes());
    stream.extend_from_slice(&[0x0F, 0, 0, 1]);
    stream.extend_from_slice(&chunk.compressed_size.to_be_bytes());
    stream.extend_from_slice(&chunk.decompressed_size.to_be_bytes());
    stream.extend_from_slice(&chunk.checksum);
    stream.extend_from_slice(&block);

    let mut reader = BlteReader::from_bytes(stream).unwrap().verify_checksums(true);
    assert_eq!(reader.len(), 64);
    let mut decoded = Vec::new();
    reader.read_to_end(&mut decoded).unwrap();

    assert_eq!(decoded, vec![0u8; 64]);
    assert_eq!(reader.blocks()[0].missing_key, Some(0x1122_3344_5566_7788));
}

#[test]
fn blte_encrypted_stream_with_registered_key() {
    let data = content(300_000);
    let mut writer = BlteWriter::new(EncodingMap::zlib(6));
    writer.append(&data[..100_000]).unwrap();
    writer.add_block(EncodingMap::zlib(6)).unwrap();
    writer.append(&data[100_000..]).unwrap();
    let encryption = BlockEncryption::salsa20(0xFA50_5078_126A_CB3E, [0x42; 16], [1, 2, 3, 4]);
    writer.encrypt_block(1, encryption).unwrap();

    let encoded = writer.finalize().unwrap().clone();
    assert_eq!(
        encoded.record.encoding_spec,
        "b:{97K*=z:{6},195K*=e:{FA505078126ACB3E,01020304,z:{6}}}"
    );

    let keys = MemoryKeyStore::new();
    keys.insert(TactKey::new(0xFA50_5078_126A_CB3E, [0x42; 16]));
    let mut reader = BlteReader::from_bytes_with_keys(encoded.data, Arc::new(keys)).unwrap();

    reader.seek(SeekFrom::Start(250_000)).unwrap();
    let mut tail = Vec::new();
    reader.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, &data[250_000..]);
    assert_eq!(reader.read_to_vec().unwrap(), data);
}

#[test]
fn blte_reader_over_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aa/bb/stream.blte");
    let data = content(70_000);

    let mut writer = BlteWriter::new(EncodingMap::zlib(9));
    writer.append(&data).unwrap();
    let record = writer.finalize_to(&path).unwrap();
    assert_eq!(record.blte_path.as_deref(), Some(path.as_path()));

    let file = std::fs::File::open(&path).unwrap();
    let len = file.metadata().unwrap().len();
    assert_eq!(len, record.encoded_size);
    let mut reader = BlteReader::new(file, len).unwrap();
    let mut decoded = Vec::new();
    reader.read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded, data);
}

#[test]
fn blte_record_serializes_and_spec_reparses() {
    let data = content(600_000);
    let encoded = BlteWriter::encode_chunked(&data, EncodingMap::mpq(5), 262_144).unwrap();
    assert_eq!(encoded.record.encoding_spec, "b:{256K*=z:{5,mpq},256K*=z:{5,mpq},73K*=z:{5,mpq}}");

    let spec = EncodingSpec::parse(&encoded.record.encoding_spec).unwrap();
    assert_eq!(spec.blocks.len(), 3);
    assert_eq!(spec.to_string(), encoded.record.encoding_spec);

    let json = serde_json::to_string(&encoded.record).unwrap();
    let reloaded: ContentRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(reloaded, encoded.record);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn blte_arbitrary_splits_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..20_000),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        compress in any::<bool>(),
    ) {
        let map = if compress { EncodingMap::zlib(6) } else { EncodingMap::None };
        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(data.len() + 1)).collect();
        points.sort_unstable();

        let mut writer = BlteWriter::new(map);
        let mut start = 0;
        for point in points {
            writer.append(&data[start..point]).unwrap();
            writer.add_block(map).unwrap();
            start = point;
        }
        writer.append(&data[start..]).unwrap();
        let encoded = writer.finalize().unwrap().clone();

        prop_assert_eq!(encoded.record.content_key, ContentKey::from_data(&data));

        let mut reader = BlteReader::new(Cursor::new(encoded.data.clone()), encoded.data.len() as u64).unwrap();
        prop_assert_eq!(reader.len(), data.len() as u64);
        let mut decoded = Vec::new();
        reader.read_to_end(&mut decoded).unwrap();
        prop_assert_eq!(decoded, data);
    }
}
