//! Performance benchmarks for tether-core.
//!
//! Run with: `cargo bench -p tether-core`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand_core::OsRng;
use tether_core::{Connection, ConnectionConfig, Event, Role, size_for_type};
use tether_crypto::{IdentityKeyPair, PinnedPeerKey};

fn connected_pair() -> (Connection, Connection) {
    let wallet = IdentityKeyPair::generate(&mut OsRng).unwrap();
    let bridge = IdentityKeyPair::generate(&mut OsRng).unwrap();
    let config = ConnectionConfig::default();

    let mut initiator = Connection::new(
        Role::Initiator,
        IdentityKeyPair::from_secret_bytes(&wallet.secret_bytes()[..]).unwrap(),
        PinnedPeerKey::new(*bridge.public_key()),
        &config,
    )
    .unwrap();
    let mut responder = Connection::new(
        Role::Responder,
        bridge,
        PinnedPeerKey::new(*wallet.public_key()),
        &config,
    )
    .unwrap();

    responder.start().unwrap();
    initiator.start().unwrap();
    drive(&mut initiator, &mut responder);
    (initiator, responder)
}

fn drive(initiator: &mut Connection, responder: &mut Connection) {
    loop {
        let mut moved = false;
        while let Some(event) = responder.poll_event() {
            if let Event::Send(bytes) = event {
                initiator.process_message(&bytes).unwrap();
                moved = true;
            }
        }
        while let Some(event) = initiator.poll_event() {
            if let Event::Send(bytes) = event {
                responder.process_message(&bytes).unwrap();
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
}

fn bench_handshake(c: &mut Criterion) {
    c.bench_function("full_handshake", |b| b.iter(connected_pair));
}

fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection_encrypt");

    for size in [64, 1024, 16384, 65536] {
        let (mut initiator, _) = connected_pair();
        let plaintext = vec![0xAB; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| initiator.encrypt(black_box(&plaintext)).unwrap())
        });
    }

    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection_roundtrip");

    for size in [64, 1024, 16384] {
        let (mut initiator, mut responder) = connected_pair();
        let plaintext = vec![0xCD; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let packet = initiator.encrypt(black_box(&plaintext)).unwrap();
                responder.decrypt(&packet).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_rekey(c: &mut Criterion) {
    let (mut initiator, mut responder) = connected_pair();

    c.bench_function("volume_rekey", |b| {
        b.iter(|| {
            let rekey = initiator.build_rekey_payload().unwrap();
            responder.process_message(&rekey).unwrap();
        })
    });
}

fn bench_size_lookup(c: &mut Criterion) {
    c.bench_function("size_for_type", |b| {
        b.iter(|| (1u8..=6).map(|tag| size_for_type(black_box(tag)).unwrap()).sum::<usize>())
    });
}

criterion_group!(
    connection_benches,
    bench_handshake,
    bench_encrypt,
    bench_roundtrip,
    bench_rekey,
    bench_size_lookup,
);

criterion_main!(connection_benches);
