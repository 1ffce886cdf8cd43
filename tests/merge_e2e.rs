use chrono::{DateTime, TimeZone, Utc};

use strata::{
    AttributeFragment, AttributeScope, AttributeValue, ChangesetProxy, CiId, CiSelection,
    CmdbEngine, Layer, LayerId, LayerSet, LayerSource, LayerState, PredicateId, RelationFragment,
    RelationScope, RelationSelection, StrataError, TimeRange, TimeThreshold, UserRef,
    ValidationError,
};

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn proxy_at(secs: i64) -> ChangesetProxy {
    ChangesetProxy::new(UserRef::new("tester"), t(secs))
}

fn layer(engine: &CmdbEngine, id: &str) -> LayerId {
    let id = LayerId::new(id).unwrap();
    engine.upsert_layer(Layer::new(id.clone())).unwrap();
    id
}

/// base sets hostname=srv1 at t=1, override sets hostname=srv1-prod at t=2.
fn srv1_scenario() -> (CmdbEngine, CiId, LayerId, LayerId) {
    let engine = CmdbEngine::in_memory();
    let base = layer(&engine, "base");
    let over = layer(&engine, "override");
    let x = engine.create_ci().unwrap();
    engine
        .insert_attribute("hostname", AttributeValue::text("srv1"), x, &base, &mut proxy_at(1))
        .unwrap();
    engine
        .insert_attribute(
            "hostname",
            AttributeValue::text("srv1-prod"),
            x,
            &over,
            &mut proxy_at(2),
        )
        .unwrap();
    (engine, x, base, over)
}

#[test]
fn later_layer_wins_with_full_provenance() {
    let (engine, x, base, over) = srv1_scenario();
    let layers = LayerSet::new([base.clone(), over.clone()]).unwrap();

    let merged = engine
        .get_merged_attribute(x, "hostname", &layers, &TimeThreshold::Latest)
        .unwrap()
        .unwrap();
    assert_eq!(merged.value(), &AttributeValue::text("srv1-prod"));
    assert_eq!(merged.layer_stack, vec![base.clone(), over.clone()]);
    assert_eq!(merged.winning_layer(), &over);

    // Reversing precedence reverses the winner.
    let reversed = LayerSet::new([over.clone(), base.clone()]).unwrap();
    let merged = engine
        .get_merged_attribute(x, "hostname", &reversed, &TimeThreshold::Latest)
        .unwrap()
        .unwrap();
    assert_eq!(merged.value(), &AttributeValue::text("srv1"));
    assert_eq!(merged.layer_stack, vec![over, base]);
}

#[test]
fn threshold_hides_later_versions() {
    let (engine, x, base, over) = srv1_scenario();
    let layers = LayerSet::new([base.clone(), over]).unwrap();

    let merged = engine
        .get_merged_ci(x, &layers, &TimeThreshold::at(t(1)))
        .unwrap()
        .unwrap();
    let hostname = merged.attribute("hostname").unwrap();
    assert_eq!(hostname.value(), &AttributeValue::text("srv1"));
    assert_eq!(hostname.layer_stack, vec![base]);

    let before = engine
        .get_merged_ci(x, &layers, &TimeThreshold::at(t(0)))
        .unwrap()
        .unwrap();
    assert!(before.is_empty());
}

#[test]
fn merge_is_deterministic() {
    let (engine, x, base, over) = srv1_scenario();
    let layers = LayerSet::new([base, over]).unwrap();
    let first = engine
        .get_merged_ci(x, &layers, &TimeThreshold::Latest)
        .unwrap();
    for _ in 0..5 {
        assert_eq!(
            engine
                .get_merged_ci(x, &layers, &TimeThreshold::Latest)
                .unwrap(),
            first
        );
    }
}

#[test]
fn tombstone_drops_layer_from_provenance() {
    let (engine, x, base, over) = srv1_scenario();
    let layers = LayerSet::new([base.clone(), over.clone()]).unwrap();
    let (_, changed) = engine
        .remove_attribute("hostname", x, &over, &mut proxy_at(3))
        .unwrap();
    assert!(changed);

    let merged = engine
        .get_merged_attribute(x, "hostname", &layers, &TimeThreshold::Latest)
        .unwrap()
        .unwrap();
    assert_eq!(merged.value(), &AttributeValue::text("srv1"));
    assert_eq!(merged.layer_stack, vec![base.clone()]);

    let pinned = engine
        .get_merged_attribute(x, "hostname", &layers, &TimeThreshold::at(t(2)))
        .unwrap()
        .unwrap();
    assert_eq!(pinned.value(), &AttributeValue::text("srv1-prod"));

    // Removing an absent attribute changes nothing.
    let mut proxy = proxy_at(4);
    let (_, changed) = engine
        .remove_attribute("hostname", x, &over, &mut proxy)
        .unwrap();
    assert!(!changed);
    assert!(!proxy.is_materialized());

    // History keeps the tombstone.
    let history = engine
        .attribute_history(x, "hostname", &over, &TimeRange::forever())
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.last().unwrap().is_removed());
}

#[test]
fn idempotent_insert_creates_no_changeset() {
    let engine = CmdbEngine::in_memory();
    let base = layer(&engine, "base");
    let x = engine.create_ci().unwrap();

    let mut first = proxy_at(1);
    let (v1, changed) = engine
        .insert_attribute("os", AttributeValue::text("linux"), x, &base, &mut first)
        .unwrap();
    assert!(changed);

    let mut second = proxy_at(2);
    let (v2, changed) = engine
        .insert_attribute("os", AttributeValue::text("linux"), x, &base, &mut second)
        .unwrap();
    assert!(!changed);
    assert!(!second.is_materialized());
    assert_eq!(v1.changeset_id, v2.changeset_id);

    let audit = engine.attributes_of_changeset(v1.changeset_id).unwrap();
    assert_eq!(audit.len(), 1);
}

#[test]
fn one_proxy_reuses_its_changeset() {
    let engine = CmdbEngine::in_memory();
    let base = layer(&engine, "base");
    let x = engine.create_ci().unwrap();
    let mut proxy = proxy_at(1);
    let (a, _) = engine
        .insert_attribute("a", AttributeValue::integer(1), x, &base, &mut proxy)
        .unwrap();
    let (b, _) = engine
        .insert_attribute("b", AttributeValue::integer(2), x, &base, &mut proxy)
        .unwrap();
    assert_eq!(a.changeset_id, b.changeset_id);
    let changeset = engine.get_changeset(a.changeset_id).unwrap().unwrap();
    assert_eq!(changeset.user, UserRef::new("tester"));
    assert_eq!(engine.attributes_of_changeset(a.changeset_id).unwrap().len(), 2);
}

#[test]
fn writes_are_authorized_against_ci_and_layer() {
    let engine = CmdbEngine::in_memory();
    let base = layer(&engine, "base");
    let x = engine.create_ci().unwrap();

    let err = engine
        .insert_attribute("a", AttributeValue::integer(1), CiId::new(), &base, &mut proxy_at(1))
        .unwrap_err();
    assert!(err.is_authorization());

    let deprecated = LayerId::new("old").unwrap();
    engine
        .upsert_layer(Layer::new(deprecated.clone()).with_state(LayerState::Deprecated))
        .unwrap();
    let mut proxy = proxy_at(1);
    let err = engine
        .insert_attribute("a", AttributeValue::integer(1), x, &deprecated, &mut proxy)
        .unwrap_err();
    assert!(err.is_authorization());
    assert!(!proxy.is_materialized());

    let online = LayerId::new("ldap").unwrap();
    engine
        .upsert_layer(Layer::new(online.clone()).with_source(LayerSource::OnlineInbound {
            adapter: "ldap".to_string(),
        }))
        .unwrap();
    assert!(engine
        .insert_attribute("a", AttributeValue::integer(1), x, &online, &mut proxy_at(1))
        .unwrap_err()
        .is_authorization());
}

#[test]
fn writes_older_than_the_latest_version_are_rejected() {
    let (engine, x, base, over) = srv1_scenario();
    let layers = LayerSet::new([base.clone(), over.clone()]).unwrap();

    let mut proxy = proxy_at(0);
    let err = engine
        .insert_attribute("hostname", AttributeValue::text("srv0"), x, &base, &mut proxy)
        .unwrap_err();
    assert!(matches!(
        err,
        StrataError::Validation(ValidationError::BackdatedWrite { .. })
    ));
    assert!(!proxy.is_materialized());
    assert!(engine
        .remove_attribute("hostname", x, &over, &mut proxy_at(1))
        .unwrap_err()
        .is_validation());
    assert!(engine
        .clear_layer(&over, &mut proxy_at(1))
        .unwrap_err()
        .is_validation());

    let merged = engine
        .get_merged_attribute(x, "hostname", &layers, &TimeThreshold::Latest)
        .unwrap()
        .unwrap();
    assert_eq!(merged.value(), &AttributeValue::text("srv1-prod"));

    // A fresh key has no head to fall behind.
    let (_, changed) = engine
        .insert_attribute("owner", AttributeValue::text("ops"), x, &base, &mut proxy_at(0))
        .unwrap();
    assert!(changed);
}

#[test]
fn invalid_values_are_rejected() {
    let engine = CmdbEngine::in_memory();
    let base = layer(&engine, "base");
    let x = engine.create_ci().unwrap();
    let err = engine
        .insert_attribute("a", AttributeValue::text("two\nlines"), x, &base, &mut proxy_at(1))
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn bulk_replace_converges_and_preserves_unchanged_facts() {
    let engine = CmdbEngine::in_memory();
    let base = layer(&engine, "base");
    let a = engine.create_ci().unwrap();
    let b = engine.create_ci().unwrap();
    let scope = AttributeScope::Layer {
        name_prefix: "hw.".to_string(),
    };

    let outcome = engine
        .bulk_replace_attributes(
            &base,
            &scope,
            vec![
                AttributeFragment::new(a, "hw.cpu", AttributeValue::integer(4)),
                AttributeFragment::new(b, "hw.cpu", AttributeValue::integer(8)),
            ],
            &mut proxy_at(1),
        )
        .unwrap();
    assert_eq!(outcome.inserted, 2);
    let first_changeset = outcome.changeset_id.unwrap();

    // Unrelated attribute outside the scope.
    engine
        .insert_attribute("owner", AttributeValue::text("ops"), a, &base, &mut proxy_at(1))
        .unwrap();

    let outcome = engine
        .bulk_replace_attributes(
            &base,
            &scope,
            vec![AttributeFragment::new(a, "hw.cpu", AttributeValue::integer(4))],
            &mut proxy_at(2),
        )
        .unwrap();
    assert_eq!(outcome.unchanged, 1);
    assert_eq!(outcome.removed, 1);
    assert_eq!(outcome.inserted + outcome.updated, 0);

    let layers = LayerSet::new([base.clone()]).unwrap();
    let cpu = engine
        .get_merged_attribute(a, "hw.cpu", &layers, &TimeThreshold::Latest)
        .unwrap()
        .unwrap();
    assert_eq!(cpu.attribute.changeset_id, first_changeset);
    assert_eq!(cpu.attribute.timestamp, t(1));
    assert!(engine
        .get_merged_attribute(b, "hw.cpu", &layers, &TimeThreshold::Latest)
        .unwrap()
        .is_none());
    assert!(engine
        .get_merged_attribute(a, "owner", &layers, &TimeThreshold::Latest)
        .unwrap()
        .is_some());

    // Replaying the same target state is a no-op.
    let mut replay = proxy_at(3);
    let outcome = engine
        .bulk_replace_attributes(
            &base,
            &scope,
            vec![AttributeFragment::new(a, "hw.cpu", AttributeValue::integer(4))],
            &mut replay,
        )
        .unwrap();
    assert!(!outcome.changed());
    assert!(!replay.is_materialized());
}

#[test]
fn bulk_replace_rejects_inconsistent_fragments() {
    let engine = CmdbEngine::in_memory();
    let base = layer(&engine, "base");
    let a = engine.create_ci().unwrap();
    let scope = AttributeScope::Cis {
        ci_ids: [a].into_iter().collect(),
        name_prefix: String::new(),
    };

    let out_of_scope = engine.bulk_replace_attributes(
        &base,
        &scope,
        vec![AttributeFragment::new(CiId::new(), "x", AttributeValue::integer(1))],
        &mut proxy_at(1),
    );
    assert!(out_of_scope.unwrap_err().is_validation());

    let duplicate = engine.bulk_replace_attributes(
        &base,
        &scope,
        vec![
            AttributeFragment::new(a, "x", AttributeValue::integer(1)),
            AttributeFragment::new(a, "x", AttributeValue::integer(2)),
        ],
        &mut proxy_at(1),
    );
    assert!(duplicate.unwrap_err().is_validation());

    let layers = LayerSet::new([base]).unwrap();
    assert!(engine
        .get_merged_ci(a, &layers, &TimeThreshold::Latest)
        .unwrap()
        .unwrap()
        .is_empty());
}

#[test]
fn relations_merge_and_bulk_replace() {
    let engine = CmdbEngine::in_memory();
    let base = layer(&engine, "base");
    let over = layer(&engine, "override");
    let app = engine.create_ci().unwrap();
    let host1 = engine.create_ci().unwrap();
    let host2 = engine.create_ci().unwrap();
    let runs_on = PredicateId::new("runs_on").unwrap();

    engine
        .insert_relation(app, host1, runs_on.clone(), &base, &mut proxy_at(1))
        .unwrap();
    engine
        .insert_relation(app, host1, runs_on.clone(), &over, &mut proxy_at(2))
        .unwrap();
    let layers = LayerSet::new([base.clone(), over]).unwrap();
    let merged = engine
        .get_merged_relations(&RelationSelection::from_cis([app]), &layers, &TimeThreshold::Latest)
        .unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].layer_stack.len(), 2);

    let outcome = engine
        .bulk_replace_relations(
            &base,
            &RelationScope::Predicates([runs_on.clone()].into_iter().collect()),
            vec![RelationFragment::new(app, host2, runs_on.clone())],
            &mut proxy_at(3),
        )
        .unwrap();
    assert_eq!((outcome.inserted, outcome.removed), (1, 1));

    let base_only = LayerSet::new([base]).unwrap();
    let related = engine
        .related_cis(host2, &base_only, &TimeThreshold::Latest)
        .unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].other_ci, app);
}

#[test]
fn clear_layer_removes_everything_in_one_changeset() {
    let engine = CmdbEngine::in_memory();
    let base = layer(&engine, "base");
    let a = engine.create_ci().unwrap();
    let b = engine.create_ci().unwrap();
    engine
        .insert_attribute("x", AttributeValue::integer(1), a, &base, &mut proxy_at(1))
        .unwrap();
    engine
        .insert_relation(a, b, PredicateId::new("uses").unwrap(), &base, &mut proxy_at(1))
        .unwrap();

    let outcome = engine.clear_layer(&base, &mut proxy_at(2)).unwrap();
    assert_eq!(outcome.removed, 2);
    let layers = LayerSet::new([base.clone()]).unwrap();
    assert!(engine
        .cis_with_data(&CiSelection::All, &layers, &TimeThreshold::Latest)
        .unwrap()
        .is_empty());
    assert_eq!(
        engine
            .cis_with_data(&CiSelection::All, &layers, &TimeThreshold::at(t(1)))
            .unwrap()
            .len(),
        2
    );
}
