use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use strata::traits::{AttributeTemplate, EffectiveTraitModel, GenericTrait, RecursiveTrait, TraitOrigin};
use strata::{
    AttributeFragment, AttributeScope, AttributeValue, AttributeValueType, ChangesetProxy, CiId,
    CiSelection, Layer, LayerId, LayerSet, Strata, StrataConfig, TimeThreshold, UserRef,
};

const CIS: usize = 1024;

struct Fixture {
    strata: Strata,
    layers: LayerSet,
    host: Arc<GenericTrait>,
    ci: CiId,
}

/// Two layers over `CIS` CIs; every fourth CI is overridden and every other
/// one is a host.
fn fixture() -> Fixture {
    let strata = Strata::in_memory(StrataConfig::default()).unwrap();
    let engine = strata.engine();
    let base = LayerId::new("base").unwrap();
    let over = LayerId::new("override").unwrap();
    engine.upsert_layer(Layer::new(base.clone())).unwrap();
    engine.upsert_layer(Layer::new(over.clone())).unwrap();

    let cis: Vec<CiId> = (0..CIS).map(|_| engine.create_ci().unwrap()).collect();
    let mut base_fragments = Vec::with_capacity(CIS * 2);
    let mut over_fragments = Vec::new();
    for (i, ci) in cis.iter().enumerate() {
        base_fragments.push(AttributeFragment::new(*ci, "__name", AttributeValue::text(format!("ci{i}"))));
        if i % 2 == 0 {
            base_fragments.push(AttributeFragment::new(*ci, "hostname", AttributeValue::text(format!("srv{i}"))));
        }
        if i % 4 == 0 {
            over_fragments.push(AttributeFragment::new(*ci, "hostname", AttributeValue::text(format!("srv{i}-prod"))));
        }
    }
    let mut proxy = ChangesetProxy::now(UserRef::new("seeder"));
    engine
        .bulk_replace_attributes(&base, &AttributeScope::layer(), base_fragments, &mut proxy)
        .unwrap();
    engine
        .bulk_replace_attributes(&over, &AttributeScope::layer(), over_fragments, &mut proxy)
        .unwrap();

    let host = strata
        .registry()
        .define(RecursiveTrait::new("host", TraitOrigin::Data).require_attribute(
            "hostname",
            AttributeTemplate::new("hostname").of_type(AttributeValueType::Text),
        ))
        .unwrap();
    Fixture {
        layers: LayerSet::new([base, over]).unwrap(),
        ci: cis[0],
        strata,
        host,
    }
}

fn bench_merge(c: &mut Criterion) {
    let f = fixture();
    let engine = f.strata.engine();

    c.bench_function("merge/single_ci", |b| {
        b.iter(|| {
            engine
                .get_merged_ci(f.ci, &f.layers, &TimeThreshold::Latest)
                .unwrap()
        });
    });

    let mut group = c.benchmark_group("merge/all_cis");
    group.throughput(Throughput::Elements(CIS as u64));
    group.bench_function("latest", |b| {
        b.iter(|| {
            engine
                .get_merged_cis(&CiSelection::All, &f.layers, &TimeThreshold::Latest, false)
                .unwrap()
        });
    });
    group.finish();
}

fn bench_traits(c: &mut Criterion) {
    let f = fixture();
    let uncached = Arc::clone(f.strata.evaluator());
    let cached = f.strata.traits();

    let mut group = c.benchmark_group("traits/evaluate_all");
    group.throughput(Throughput::Elements(CIS as u64));
    group.bench_function("uncached", |b| {
        b.iter(|| {
            uncached
                .evaluate_all_for_trait(&f.host, &f.layers, &CiSelection::All, &TimeThreshold::Latest)
                .unwrap()
        });
    });
    group.bench_function("cached", |b| {
        b.iter(|| {
            cached
                .cis_with_trait(&f.host, &f.layers, &CiSelection::All, &TimeThreshold::Latest)
                .unwrap()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_merge, bench_traits);
criterion_main!(benches);
