//! Hot paths of the request/reply cycle: address parsing, frame building and
//! reply decoding.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use omron_fins_client::transport::FinsTcpCodec;
use omron_fins_client::{
    decode_body, AddressCodec, Command, FinsHeader, FinsResponse, MultipleReadCommand, NodeAddress,
    PlcFamily, ReadCommand, WriteCommand,
};
use tokio_util::codec::{Decoder, Encoder};

fn header() -> FinsHeader {
    FinsHeader::new_command(NodeAddress::new(0, 10, 0), NodeAddress::new(0, 1, 0), 1)
}

fn read_reply(words: usize) -> Vec<u8> {
    let mut frame = vec![0xC0, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x01, 0x01, 0x01, 0x00, 0x00];
    frame.extend((0..words as u16).flat_map(|w| w.to_be_bytes()));
    frame
}

fn bench_parse(c: &mut Criterion) {
    let codec = AddressCodec::new(PlcFamily::CsCj);
    let mut group = c.benchmark_group("parse");
    for address in ["D100", "CIO20.5", "T10.x", "E3_1000"] {
        group.bench_function(address, |b| b.iter(|| codec.parse(black_box(address))));
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let codec = AddressCodec::new(PlcFamily::CsCj);
    let read = Command::Read(ReadCommand::new(codec.parse("D100").unwrap(), 100).unwrap());
    let values: Vec<_> = (0..100i32).map(Into::into).collect();
    let write = Command::Write(WriteCommand::new(codec.parse("D100").unwrap(), &values).unwrap());
    let multiple = Command::ReadMultiple(
        MultipleReadCommand::new(codec.parse_all(&["D10", "CIO20.0", "W5", "H7.1"]).unwrap()).unwrap(),
    );

    let mut group = c.benchmark_group("build");
    group.bench_function("read_100", |b| b.iter(|| black_box(&read).encode(&header())));
    group.bench_function("write_100", |b| b.iter(|| black_box(&write).encode(&header())));
    group.bench_function("read_multiple_4", |b| b.iter(|| black_box(&multiple).encode(&header())));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let codec = AddressCodec::new(PlcFamily::CsCj);
    let command = Command::Read(ReadCommand::new(codec.parse("D0").unwrap(), 100).unwrap());
    let frame = read_reply(100);

    let mut group = c.benchmark_group("decode");
    group.bench_function("read_100", |b| {
        b.iter(|| {
            let response = FinsResponse::from_bytes(black_box(&frame)).unwrap();
            decode_body(&command, &response).unwrap()
        })
    });
    group.finish();
}

fn bench_tcp_envelope(c: &mut Criterion) {
    let frame = Bytes::from(read_reply(100));
    let mut group = c.benchmark_group("tcp_envelope");
    group.bench_function("encode_decode", |b| {
        b.iter(|| {
            let mut codec = FinsTcpCodec::new();
            let mut buf = BytesMut::new();
            buf.extend_from_slice(b"FINS\x00\x00\x00\x10\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00\x01\x00\x00\x00\x0a");
            codec.decode(&mut buf).unwrap();
            codec.encode(black_box(frame.clone()), &mut buf).unwrap();
            codec.decode(&mut buf).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_build, bench_decode, bench_tcp_envelope);
criterion_main!(benches);
