use coap_lite::{CoapOption, Packet, RequestType};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use edhoc_sul::aead::AeadAlgorithm;
use edhoc_sul::edhoc::config::CombinedMessageVersion;
use edhoc_sul::edhoc::{crypto, suite::CipherSuite};
use edhoc_sul::oscore::SecurityContext;
use edhoc_sul::transport::combined;

// EDHOC ----------------------------------------------------------------------

const G_XY: [u8; 32] = [
    0x2F, 0x0C, 0xB7, 0xE8, 0x60, 0xBA, 0x53, 0x8F, 0xBF, 0x5C, 0x8B, 0xDE,
    0xD0, 0x09, 0xF6, 0x25, 0x9B, 0x4B, 0x62, 0x8F, 0xE1, 0xEB, 0x7D, 0xBE,
    0x93, 0x78, 0xE5, 0xEC, 0xF7, 0xA8, 0x24, 0xBA,
];
const G_RX: [u8; 32] = [
    0xF2, 0xB6, 0xEE, 0xA0, 0x22, 0x20, 0xB9, 0x5E, 0xEE, 0x5A, 0x0B, 0xC7,
    0x01, 0xF0, 0x74, 0xE0, 0x0A, 0x84, 0x3E, 0xA0, 0x24, 0x22, 0xF6, 0x08,
    0x25, 0xFB, 0x26, 0x9B, 0x3E, 0x16, 0x14, 0x23,
];
const TH_2: [u8; 32] = [
    0x9D, 0x2A, 0xF3, 0xA3, 0xD3, 0xFC, 0x06, 0xAE, 0xA8, 0x11, 0x0F, 0x14,
    0xBA, 0x12, 0xAD, 0x0B, 0x4F, 0xB7, 0xE5, 0xCD, 0xF5, 0x9C, 0x7D, 0xF1,
    0xCF, 0x2D, 0xFE, 0x6C, 0x20, 0x37, 0x15, 0x3A,
];
const PLAINTEXT_2: [u8; 11] = [
    0x27, 0xA1, 0x04, 0x41, 0x32, 0x48, 0xD0, 0xD1, 0xA5, 0x94, 0x79,
];

fn key_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_schedule");

    group.bench_function("prk_2e", |b| {
        b.iter(|| crypto::prk_2e(&TH_2, &G_XY))
    });

    let prk_2e = crypto::prk_2e(&TH_2, &G_XY);
    group.bench_function("keystream_2", |b| {
        b.iter(|| crypto::keystream_2(&prk_2e, &TH_2, 128).unwrap())
    });
    group.bench_function("prk_3e2m", |b| {
        b.iter(|| crypto::prk_3e2m(&prk_2e, &TH_2, Some(&G_RX)).unwrap())
    });

    let prk_3e2m = crypto::prk_3e2m(&prk_2e, &TH_2, Some(&G_RX)).unwrap();
    group.bench_function("th_3_to_prk_out", |b| {
        b.iter(|| {
            let th_3 = crypto::next_th(&TH_2, &PLAINTEXT_2, None).unwrap();
            let prk_4e3m = crypto::prk_4e3m(&prk_3e2m, &th_3, None).unwrap();
            let th_4 = crypto::next_th(&th_3, &PLAINTEXT_2, None).unwrap();
            crypto::prk_out(&prk_4e3m, &th_4).unwrap()
        })
    });

    let prk_exporter = crypto::prk_exporter(&prk_3e2m).unwrap();
    group.bench_function("oscore_master_secret", |b| {
        b.iter(|| crypto::exporter(&prk_exporter, 0, &[], 16).unwrap())
    });

    group.bench_function("ciphertext_3", |b| {
        let suite = CipherSuite::Suite2;
        let (key, iv) = crypto::key_and_iv(
            suite,
            &prk_3e2m,
            (crypto::K_3, crypto::IV_3),
            &TH_2,
        )
        .unwrap();
        b.iter(|| {
            crypto::encrypt(suite, &key, &iv, &TH_2, &PLAINTEXT_2).unwrap()
        })
    });

    group.finish();
}

// Transport ------------------------------------------------------------------

// (C_R, CIPHERTEXT_3) with a 64 byte ciphertext
fn message_3() -> Vec<u8> {
    let mut message_3 = vec![0x00, 0x58, 0x40];
    message_3.extend_from_slice(&[0xA5; 64]);
    message_3
}

fn combined_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("combined");
    let message_3 = message_3();
    let oscore_payload = [0x5A; 32];

    for version in [CombinedMessageVersion::V06, CombinedMessageVersion::V07]
    {
        let name = format!("{:?}", version).to_lowercase();
        group.bench_function(format!("join_{}", name), |b| {
            b.iter(|| {
                combined::join(version, &message_3, true, &oscore_payload, 1024)
                    .unwrap()
            })
        });

        let payload =
            combined::join(version, &message_3, true, &oscore_payload, 1024)
                .unwrap();
        group.bench_function(format!("split_{}", name), |b| {
            b.iter(|| combined::split(version, &payload).unwrap())
        });
    }

    group.finish();
}

// OSCORE ---------------------------------------------------------------------

const MASTER_SECRET: [u8; 16] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
    0x0D, 0x0E, 0x0F, 0x10,
];
const MASTER_SALT: [u8; 8] = [0x9E, 0x7C, 0xA9, 0x22, 0x23, 0x78, 0x63, 0x40];
const CLIENT_ID: [u8; 1] = [0x36];
const SERVER_ID: [u8; 1] = [0x00];

fn context(sender_id: &[u8], recipient_id: &[u8]) -> SecurityContext {
    SecurityContext::new(
        AeadAlgorithm::AesCcm16_64_128,
        &MASTER_SECRET,
        &MASTER_SALT,
        sender_id.to_vec(),
        recipient_id.to_vec(),
    )
    .unwrap()
}

fn request() -> Vec<u8> {
    let mut packet = Packet::new();
    packet.header.code = coap_lite::MessageClass::Request(RequestType::Get);
    packet.add_option(CoapOption::UriPath, b"app".to_vec());
    packet.to_bytes().unwrap()
}

fn oscore(c: &mut Criterion) {
    let mut group = c.benchmark_group("oscore");
    let request = request();

    group.bench_function("context_derivation", |b| {
        b.iter(|| context(&CLIENT_ID, &SERVER_ID))
    });

    let mut client = context(&CLIENT_ID, &SERVER_ID);
    group.bench_function("protection_request", |b| {
        b.iter(|| client.protect_request(&request).unwrap())
    });

    // A fresh replay window for every unprotection
    let protected = context(&CLIENT_ID, &SERVER_ID)
        .protect_request(&request)
        .unwrap();
    group.bench_function("unprotection_request", |b| {
        b.iter_batched(
            || context(&SERVER_ID, &CLIENT_ID),
            |mut server| server.unprotect_request(&protected).unwrap(),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

// Criterion ------------------------------------------------------------------

criterion_group!(edhoc_benches, key_schedule);
criterion_group!(transport_benches, combined_payload);
criterion_group!(oscore_benches, oscore);
criterion_main!(edhoc_benches, transport_benches, oscore_benches);
