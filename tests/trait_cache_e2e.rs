use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};

use strata::traits::{
    AttributeTemplate, EffectiveTraitModel, GenericTrait, RecursiveTrait, RelationTemplate,
    TraitOrigin,
};
use strata::{
    AttributeValue, AttributeValueType, ChangesetProxy, CiId, CiSelection, Layer, LayerId,
    LayerSet, LayerSource, MutationKind, PredicateId, Strata, StrataConfig, TimeThreshold,
    UserRef,
};

fn proxy() -> ChangesetProxy {
    ChangesetProxy::now(UserRef::new("tester"))
}

fn host_trait() -> RecursiveTrait {
    RecursiveTrait::new("host", TraitOrigin::Data).require_attribute(
        "hostname",
        AttributeTemplate::new("hostname").of_type(AttributeValueType::Text),
    )
}

struct Setup {
    strata: Strata,
    base: LayerId,
    layers: LayerSet,
    host: Arc<GenericTrait>,
}

fn setup(config: StrataConfig) -> Setup {
    let strata = Strata::in_memory(config).unwrap();
    let base = LayerId::new("base").unwrap();
    strata
        .engine()
        .upsert_layer(Layer::new(base.clone()))
        .unwrap();
    let host = strata.registry().define(host_trait()).unwrap();
    Setup {
        layers: LayerSet::new([base.clone()]).unwrap(),
        strata,
        base,
        host,
    }
}

fn set_hostname(s: &Setup, ci: CiId, value: AttributeValue) {
    s.strata
        .engine()
        .insert_attribute("hostname", value, ci, &s.base, &mut proxy())
        .unwrap();
}

fn truth(s: &Setup) -> HashSet<CiId> {
    s.strata
        .evaluator()
        .cis_with_trait(&s.host, &s.layers, &CiSelection::All, &TimeThreshold::Latest)
        .unwrap()
}

fn cached(s: &Setup) -> HashSet<CiId> {
    s.strata
        .traits()
        .cis_with_trait(&s.host, &s.layers, &CiSelection::All, &TimeThreshold::Latest)
        .unwrap()
}

fn assert_superset(s: &Setup) {
    let lookup = s.strata.cache().lookup("host", &s.layers).unwrap();
    if lookup.hit {
        assert!(truth(s).is_subset(&lookup.superset));
    }
}

#[test]
fn miss_fills_cache_exactly_then_hits() {
    let s = setup(StrataConfig::default());
    let a = s.strata.engine().create_ci().unwrap();
    let b = s.strata.engine().create_ci().unwrap();
    set_hostname(&s, a, AttributeValue::text("a"));
    set_hostname(&s, b, AttributeValue::integer(1));

    assert!(!s.strata.cache().lookup("host", &s.layers).unwrap().hit);
    assert_eq!(cached(&s), HashSet::from([a]));

    let lookup = s.strata.cache().lookup("host", &s.layers).unwrap();
    assert!(lookup.hit);
    assert_eq!(lookup.superset, truth(&s));
    assert_eq!(cached(&s), HashSet::from([a]));
}

#[test]
fn writes_grow_and_reads_shrink() {
    let s = setup(StrataConfig::default());
    let a = s.strata.engine().create_ci().unwrap();
    set_hostname(&s, a, AttributeValue::text("a"));
    assert_eq!(cached(&s), HashSet::from([a]));

    // A new host is never hidden.
    let b = s.strata.engine().create_ci().unwrap();
    set_hostname(&s, b, AttributeValue::text("b"));
    assert_superset(&s);
    assert_eq!(cached(&s), HashSet::from([a, b]));

    // Losing the trait leaves a stale member until the next read shrinks it.
    set_hostname(&s, a, AttributeValue::integer(0));
    assert!(s
        .strata
        .cache()
        .lookup("host", &s.layers)
        .unwrap()
        .superset
        .contains(&a));
    assert_eq!(cached(&s), HashSet::from([b]));
    assert_eq!(
        s.strata.cache().lookup("host", &s.layers).unwrap().superset,
        HashSet::from([b])
    );
}

#[test]
fn hit_respects_caller_selection() {
    let s = setup(StrataConfig::default());
    let a = s.strata.engine().create_ci().unwrap();
    let b = s.strata.engine().create_ci().unwrap();
    set_hostname(&s, a, AttributeValue::text("a"));
    set_hostname(&s, b, AttributeValue::text("b"));
    let model = s.strata.traits();

    let only_b = model
        .cis_with_trait(&s.host, &s.layers, &CiSelection::specific([b]), &TimeThreshold::Latest)
        .unwrap();
    assert_eq!(only_b, HashSet::from([b]));
    // The miss cached the whole universe, not just the selection.
    assert_eq!(
        s.strata.cache().lookup("host", &s.layers).unwrap().superset,
        HashSet::from([a, b])
    );

    let not_b = model
        .cis_with_trait(&s.host, &s.layers, &CiSelection::all_except([b]), &TimeThreshold::Latest)
        .unwrap();
    assert_eq!(not_b, HashSet::from([a]));
    assert!(model
        .cis_with_trait(&s.host, &s.layers, &CiSelection::None, &TimeThreshold::Latest)
        .unwrap()
        .is_empty());
}

#[test]
fn historical_queries_bypass_cache() {
    let s = setup(StrataConfig::default());
    let a = s.strata.engine().create_ci().unwrap();
    set_hostname(&s, a, AttributeValue::text("a"));

    let past = TimeThreshold::at(Utc::now() - Duration::days(1));
    let result = s
        .strata
        .traits()
        .cis_with_trait(&s.host, &s.layers, &CiSelection::All, &past)
        .unwrap();
    assert!(result.is_empty());
    assert!(s.strata.cache().is_empty().unwrap());
}

#[test]
fn online_layers_bypass_cache() {
    let s = setup(StrataConfig::default());
    let online = LayerId::new("ldap").unwrap();
    s.strata
        .engine()
        .upsert_layer(Layer::new(online.clone()).with_source(LayerSource::OnlineInbound {
            adapter: "ldap".to_string(),
        }))
        .unwrap();
    let layers = LayerSet::new([s.base.clone(), online]).unwrap();
    s.strata
        .traits()
        .cis_with_trait(&s.host, &layers, &CiSelection::All, &TimeThreshold::Latest)
        .unwrap();
    assert!(s.strata.cache().is_empty().unwrap());
}

#[test]
fn disabled_cache_is_pass_through() {
    let config = StrataConfig::from_json_str(r#"{"cache": {"enabled": false}}"#).unwrap();
    let s = setup(config);
    let a = s.strata.engine().create_ci().unwrap();
    set_hostname(&s, a, AttributeValue::text("a"));
    assert_eq!(cached(&s), HashSet::from([a]));
    assert!(s.strata.cache().is_empty().unwrap());
}

#[test]
fn clearing_a_layer_purges_its_entries() {
    let s = setup(StrataConfig::default());
    let a = s.strata.engine().create_ci().unwrap();
    set_hostname(&s, a, AttributeValue::text("a"));
    cached(&s);
    s.strata.engine().clear_layer(&s.base, &mut proxy()).unwrap();
    assert!(!s.strata.cache().lookup("host", &s.layers).unwrap().hit);
    assert!(cached(&s).is_empty());
}

#[test]
fn trait_config_layer_writes_purge_everything() {
    let config =
        StrataConfig::from_yaml_str("trait_config_layers:\n  - cmdb_meta\n").unwrap();
    let s = setup(config);
    let meta = LayerId::new("cmdb_meta").unwrap();
    s.strata
        .engine()
        .upsert_layer(Layer::new(meta.clone()))
        .unwrap();
    let a = s.strata.engine().create_ci().unwrap();
    set_hostname(&s, a, AttributeValue::text("a"));
    cached(&s);
    assert!(!s.strata.cache().is_empty().unwrap());

    s.strata
        .engine()
        .insert_attribute("trait.def", AttributeValue::text("x"), a, &meta, &mut proxy())
        .unwrap();
    assert!(s.strata.cache().is_empty().unwrap());
}

#[test]
fn trait_redefinition_invalidates_cached_members() {
    let mut s = setup(StrataConfig::default());
    let a = s.strata.engine().create_ci().unwrap();
    s.strata
        .engine()
        .insert_attribute("fqdn", AttributeValue::text("a.example"), a, &s.base, &mut proxy())
        .unwrap();
    assert!(cached(&s).is_empty());

    s.host = s
        .strata
        .registry()
        .define(RecursiveTrait::new("host", TraitOrigin::Data).require_attribute(
            "fqdn",
            AttributeTemplate::new("fqdn").of_type(AttributeValueType::Text),
        ))
        .unwrap();
    assert_eq!(cached(&s), HashSet::from([a]));
}

#[test]
fn hinted_traits_follow_writes_to_neighbours() {
    let s = setup(StrataConfig::default());
    let app = s
        .strata
        .registry()
        .define(RecursiveTrait::new("app", TraitOrigin::Data).require_relation(
            "host",
            RelationTemplate::new(PredicateId::new("runs_on").unwrap(), true)
                .bounds(Some(1), None)
                .with_trait_hint("host"),
        ))
        .unwrap();
    let engine = s.strata.engine();
    let svc = engine.create_ci().unwrap();
    let srv = engine.create_ci().unwrap();
    engine
        .insert_relation(svc, srv, PredicateId::new("runs_on").unwrap(), &s.base, &mut proxy())
        .unwrap();

    let query = |model: &dyn EffectiveTraitModel| {
        model
            .cis_with_trait(&app, &s.layers, &CiSelection::All, &TimeThreshold::Latest)
            .unwrap()
    };
    assert!(query(s.strata.traits().as_ref()).is_empty());

    // Only srv is written, yet svc gains the trait through its hint.
    set_hostname(&s, srv, AttributeValue::text("srv"));
    let truth = query(s.strata.evaluator().as_ref());
    assert_eq!(truth, HashSet::from([svc]));
    assert_eq!(query(s.strata.traits().as_ref()), truth);

    let lookup = s.strata.cache().lookup("app", &s.layers).unwrap();
    assert!(!lookup.hit || truth.is_subset(&lookup.superset));
}

#[test]
fn feed_sees_committed_mutations() {
    let s = setup(StrataConfig::default());
    let rx = s.strata.feed().subscribe();
    let a = s.strata.engine().create_ci().unwrap();
    set_hostname(&s, a, AttributeValue::text("a"));
    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, MutationKind::Attributes);
    assert_eq!(event.ci_ids, vec![a]);
    assert_eq!(event.layer, s.base);
}

#[test]
fn concurrent_writers_never_break_superset_soundness() {
    let s = Arc::new(setup(StrataConfig::default()));
    let cis: Vec<CiId> = (0..32)
        .map(|_| s.strata.engine().create_ci().unwrap())
        .collect();

    let mut handles = Vec::new();
    for (w, chunk) in cis.chunks(8).enumerate() {
        let s = Arc::clone(&s);
        let chunk = chunk.to_vec();
        handles.push(thread::spawn(move || {
            for round in 0..4i64 {
                for (i, ci) in chunk.iter().enumerate() {
                    let value = if (i as i64 + round + w as i64) % 2 == 0 {
                        AttributeValue::text("h")
                    } else {
                        AttributeValue::integer(round)
                    };
                    set_hostname(&s, *ci, value);
                }
            }
        }));
    }
    for _ in 0..2 {
        let s = Arc::clone(&s);
        handles.push(thread::spawn(move || {
            for _ in 0..16 {
                cached(&s);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_superset(&s);
    assert_eq!(cached(&s), truth(&s));
}
