use bitbind::binding::IntegerBind;
use bitbind::core::{Core, CoreBuilder};
use criterion::{Criterion, criterion_group, criterion_main};

fn gen_core(field_count: usize) -> Core {
    let mut def = bitbind::template::TypeDef::new("Packet");
    for i in 0..field_count {
        def = def.field(format!("f{}", i), IntegerBind::new(16));
    }

    CoreBuilder::new().register_type(def).build().unwrap()
}

fn gen_packet(total_bits: usize) -> Vec<u8> {
    let total_bytes = (total_bits + 7) / 8;
    let mut data = Vec::with_capacity(total_bytes);

    // Deterministic but non-trivial pattern
    for i in 0..total_bytes {
        data.push((i * 31 % 256) as u8);
    }

    data
}

fn bench_parse(c: &mut Criterion) {
    for &field_count in &[1usize, 10, 50, 100] {
        let core = gen_core(field_count);
        let packet = gen_packet(field_count * 16);

        c.bench_function(&format!("parse_{}_fields", field_count), |b| {
            b.iter(|| {
                let _ = core.parse("Packet", &packet).unwrap();
            })
        });
    }
}

fn bench_compose(c: &mut Criterion) {
    for &field_count in &[10usize, 100] {
        let core = gen_core(field_count);
        let packet = gen_packet(field_count * 16);
        let message = core.parse("Packet", &packet).unwrap();

        c.bench_function(&format!("compose_{}_fields", field_count), |b| {
            b.iter(|| {
                let _ = core.compose("Packet", &message).unwrap();
            })
        });
    }
}

criterion_group!(benches, bench_parse, bench_compose);
criterion_main!(benches);
