use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use simradio::codec::{TransmitChannel, VoiceFrame};
use simradio::radio::Modulation;

fn sample_frame(channels: usize) -> VoiceFrame {
    VoiceFrame {
        sender_id: "AbCdEfGhIjKlMnOpQrStUv".to_string(),
        unit_id: 42,
        sequence: 1_000,
        channels: (0..channels)
            .map(|i| TransmitChannel::new(251e6 + i as f64 * 1e6, Modulation::Am, 0))
            .collect(),
        // one 20 ms voice packet
        audio: Bytes::from(vec![0x5a; 120]),
    }
}

fn bench_encode(c: &mut Criterion) {
    let frame = sample_frame(1);
    c.bench_function("voice_encode", |b| b.iter(|| black_box(frame.encode())));
}

fn bench_decode(c: &mut Criterion) {
    let wire = sample_frame(1).encode().expect("sample frame encodes");
    c.bench_function("voice_decode", |b| b.iter(|| black_box(VoiceFrame::decode(&wire))));
}

fn bench_decode_simultaneous(c: &mut Criterion) {
    let wire = sample_frame(4).encode().expect("sample frame encodes");
    c.bench_function("voice_decode_4_channels", |b| {
        b.iter(|| black_box(VoiceFrame::decode(&wire)))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_decode_simultaneous);
criterion_main!(benches);
