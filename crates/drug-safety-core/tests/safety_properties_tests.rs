//! End-to-end behaviour of the wired safety services.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use drug_safety_core::knowledge::mock::{MockFailure, MockKnowledgeSource};
use drug_safety_core::models::{
    AllergySeverity, AuditAction, InteractionDrug, InteractionRecord, InteractionSeverity,
    MatchConfidence, MatchType, NewAllergy, TermType,
};
use drug_safety_core::{
    CacheLayer, CrossReactivityTable, DrugConcept, DrugSafety, FeatureFlag, LookupSource,
    SafetyConfig, SafetyError,
};
use proptest::prelude::*;

fn concept(id: &str, name: &str, ingredients: &[&str], classes: &[&str]) -> DrugConcept {
    let mut concept = DrugConcept::new(id, name, TermType::ClinicalDrug);
    concept.active_ingredients = ingredients.iter().map(|s| s.to_string()).collect();
    concept.drug_classes = classes.iter().map(|s| s.to_string()).collect();
    concept
}

fn interaction(a: (&str, &str), b: (&str, &str), severity: InteractionSeverity) -> InteractionRecord {
    InteractionRecord {
        drug_a: InteractionDrug {
            id: a.0.into(),
            name: a.1.into(),
        },
        drug_b: InteractionDrug {
            id: b.0.into(),
            name: b.1.into(),
        },
        severity,
        description: format!("{} and {}", a.1, b.1),
        source: "mock".into(),
        clinical_effect: None,
        evidence_level: None,
    }
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn knowledge() -> Arc<MockKnowledgeSource> {
    Arc::new(
        MockKnowledgeSource::new()
            .with_concept(concept("7980", "Penicillin V Potassium 250 MG", &["penicillin V"], &["Penicillins"]))
            .with_concept(concept("2180", "Cefazolin 1 G Injection", &["cefazolin"], &["cephalosporin"]))
            .with_concept(concept("1191", "Aspirin 81 MG", &["aspirin"], &["NSAIDs"]))
            .with_concept(concept("11289", "Warfarin 5 MG", &["warfarin"], &["Anticoagulants"]))
            .with_interaction(interaction(
                ("11289", "warfarin"),
                ("1191", "aspirin"),
                InteractionSeverity::High,
            )),
    )
}

fn safety(source: &Arc<MockKnowledgeSource>) -> DrugSafety {
    DrugSafety::in_memory(source.clone()).unwrap()
}

#[tokio::test]
async fn test_pair_order_shares_cache_entry() {
    let source = knowledge();
    let safety = safety(&source);

    let forward = safety.check_interactions(&ids(&["11289", "1191"])).await.unwrap();
    let reverse = safety.check_interactions(&ids(&["1191", "11289"])).await.unwrap();

    assert!(forward.has_interactions);
    assert_eq!(
        serde_json::to_string(&forward.interactions).unwrap(),
        serde_json::to_string(&reverse.interactions).unwrap()
    );
    assert_eq!(source.calls.interactions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fewer_than_two_drugs_never_calls_out() {
    let source = knowledge();
    let safety = safety(&source);

    for drugs in [ids(&[]), ids(&["1191"])] {
        let result = safety.check_interactions(&drugs).await.unwrap();
        assert!(!result.has_interactions);
    }
    assert_eq!(source.calls.total(), 0);
}

#[tokio::test]
async fn test_no_allergies_fetches_no_details() {
    let source = knowledge();
    let safety = safety(&source);

    let result = safety
        .check_allergy_conflicts("patient-1", &ids(&["7980", "2180"]))
        .await
        .unwrap();

    assert!(!result.has_conflicts);
    assert_eq!(source.calls.detail.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_allergy_until_deactivated() {
    let source = knowledge();
    let safety = safety(&source);

    let first = safety
        .add_allergy("patient-1", NewAllergy::drug("Penicillin", AllergySeverity::Severe), "dr-a")
        .await
        .unwrap();

    let err = safety
        .add_allergy("patient-1", NewAllergy::drug("PENICILLIN", AllergySeverity::Mild), "dr-a")
        .await
        .unwrap_err();
    assert!(matches!(err, SafetyError::Duplicate { .. }));

    safety.deactivate_allergy(&first.id, "dr-a").await.unwrap();
    let second = safety
        .add_allergy("patient-1", NewAllergy::drug("PENICILLIN", AllergySeverity::Mild), "dr-a")
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_penicillin_and_cephalosporin_conflicts() {
    let source = Arc::new(
        MockKnowledgeSource::new()
            .with_concept(concept("1", "Pen-Vee K", &["penicillin"], &[]))
            .with_concept(concept("2", "Ancef", &["cefazolin"], &["cephalosporin"])),
    );
    let safety = safety(&source);
    safety
        .add_allergy("patient-1", NewAllergy::drug("Penicillin", AllergySeverity::Severe), "dr-a")
        .await
        .unwrap();
    safety
        .add_allergy("patient-2", NewAllergy::drug("Peanuts", AllergySeverity::Severe), "dr-a")
        .await
        .unwrap();

    let result = safety
        .check_allergy_conflicts("patient-1", &ids(&["1", "2"]))
        .await
        .unwrap();
    assert_eq!(result.conflicts.len(), 2);

    let ingredient = result.conflicts.iter().find(|c| c.matched_drug_id == "1").unwrap();
    assert_eq!(ingredient.match_type, MatchType::Ingredient);
    assert_eq!(ingredient.confidence, MatchConfidence::High);

    let cross = result.conflicts.iter().find(|c| c.matched_drug_id == "2").unwrap();
    assert_eq!(cross.match_type, MatchType::CrossReactive);
    assert_eq!(cross.confidence, MatchConfidence::Low);

    let peanuts = safety
        .check_allergy_conflicts("patient-2", &ids(&["2"]))
        .await
        .unwrap();
    assert!(!peanuts.has_conflicts);
}

#[tokio::test]
async fn test_conflicts_sorted_most_severe_first() {
    let source = Arc::new(MockKnowledgeSource::new().with_concept(concept(
        "9",
        "Combo",
        &["aspirin", "codeine", "penicillin"],
        &[],
    )));
    let safety = safety(&source);
    for (name, severity) in [
        ("aspirin", AllergySeverity::Mild),
        ("penicillin", AllergySeverity::LifeThreatening),
        ("codeine", AllergySeverity::Moderate),
    ] {
        safety
            .add_allergy("patient-1", NewAllergy::drug(name, severity), "dr-a")
            .await
            .unwrap();
    }

    let result = safety.check_allergy_conflicts("patient-1", &ids(&["9"])).await.unwrap();
    let severities: Vec<_> = result.conflicts.iter().map(|c| c.severity).collect();
    assert_eq!(
        severities,
        vec![
            AllergySeverity::LifeThreatening,
            AllergySeverity::Moderate,
            AllergySeverity::Mild
        ]
    );
}

#[tokio::test]
async fn test_override_is_idempotent() {
    let source = knowledge();
    let safety = safety(&source);

    let check = safety.check_interactions(&ids(&["11289", "1191"])).await.unwrap();
    let check_id = check.check_id.unwrap();
    let checks = vec![check_id.clone()];

    let first = safety
        .record_override(&checks, "Benefit outweighs bleeding risk", "dr-a")
        .await
        .unwrap();
    let second = safety
        .record_override(&checks, "Benefit outweighs bleeding risk", "dr-a")
        .await
        .unwrap();

    assert_eq!(first.overridden_count, 1);
    assert_eq!(first.high_severity_count, 1);
    assert_eq!(second.overridden_count, 0);
    assert_eq!(second.already_overridden, checks);

    let db = safety.database().lock().unwrap();
    let stored = db.get_check(&check_id).unwrap().unwrap();
    assert!(stored.overridden);

    let events = db.list_audit_events(None, None).unwrap();
    let count = |action: AuditAction| events.iter().filter(|e| e.event.action == action).count();
    assert_eq!(count(AuditAction::OverrideRecorded), 2);
    assert_eq!(count(AuditAction::HighSeverityOverride), 1);
}

#[tokio::test]
async fn test_override_requires_reason() {
    let source = knowledge();
    let safety = safety(&source);

    let err = safety
        .record_override(&ids(&["any"]), "   ", "dr-a")
        .await
        .unwrap_err();
    assert!(matches!(err, SafetyError::Validation(_)));
}

#[tokio::test]
async fn test_detail_timeout_uses_fallback_copy() {
    let source = knowledge();
    let config = SafetyConfig::default();
    let db = drug_safety_core::Database::open_in_memory().unwrap().into_shared();

    let warm = DrugSafety::with_parts(
        config.clone(),
        source.clone(),
        db.clone(),
        CacheLayer::local(&config.cache),
        CrossReactivityTable::default(),
    );
    let fresh = warm.get_drug_detail("1191").await.unwrap();
    assert_eq!(fresh.source, LookupSource::External);

    // Restart with a cold cache while the service is down
    source.set_failure(Some(MockFailure::Timeout));
    let cold = DrugSafety::with_parts(
        config.clone(),
        source.clone(),
        db,
        CacheLayer::local(&config.cache),
        CrossReactivityTable::default(),
    );

    let detail = cold.get_drug_detail("1191").await.unwrap();
    assert!(detail.is_fallback());
    assert!(detail.verified_at.is_some());
    assert_eq!(detail.concept.name, "Aspirin 81 MG");

    let missing = cold.get_drug_detail("11289").await.unwrap_err();
    assert!(matches!(missing, SafetyError::NotFound(_)));
}

#[tokio::test]
async fn test_flag_value_fixed_at_call_start() {
    let source = knowledge();
    let safety = safety(&source);
    safety
        .add_allergy("patient-1", NewAllergy::drug("Penicillin", AllergySeverity::Severe), "dr-a")
        .await
        .unwrap();
    source.set_latency(Some(Duration::from_millis(100)));

    let drugs = ids(&["7980"]);
    let check = safety.check_allergy_conflicts("patient-1", &drugs);
    let disable = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        safety.flags().set(FeatureFlag::AllergyChecking, false);
    };
    let (in_flight, ()) = tokio::join!(check, disable);
    assert!(in_flight.unwrap().has_conflicts);

    let after = safety.check_allergy_conflicts("patient-1", &drugs).await.unwrap();
    assert!(!after.has_conflicts);
    assert!(after.check_id.is_none());
}

#[tokio::test]
async fn test_audit_chain_and_export() {
    let source = knowledge();
    let safety = safety(&source);

    safety
        .add_allergy("patient-1", NewAllergy::drug("Aspirin", AllergySeverity::Moderate), "dr-a")
        .await
        .unwrap();
    safety
        .check_allergy_conflicts("patient-1", &ids(&["1191"]))
        .await
        .unwrap();
    safety.check_interactions(&ids(&["1191", "11289"])).await.unwrap();

    let chain = safety.verify_audit_chain().unwrap();
    assert!(chain.valid);
    assert_eq!(chain.checked, 3);

    let export = safety.export_audit().unwrap();
    assert_eq!(export.metadata.event_count, 3);
    assert!(export.metadata.chain.valid);

    let history = safety.check_history("patient-1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].finding_count, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_interaction_results_ignore_input_order(
        order in Just(vec!["1191", "11289", "7980", "2180"]).prop_shuffle()
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (baseline, shuffled, calls) = runtime.block_on(async {
            let source = knowledge();
            let safety = safety(&source);
            let baseline = safety
                .check_interactions(&ids(&["1191", "11289", "7980", "2180"]))
                .await
                .unwrap();
            let shuffled = safety.check_interactions(&ids(&order)).await.unwrap();
            (baseline, shuffled, source.calls.interactions.load(Ordering::SeqCst))
        });

        prop_assert_eq!(
            serde_json::to_string(&baseline.interactions).unwrap(),
            serde_json::to_string(&shuffled.interactions).unwrap()
        );
        prop_assert_eq!(calls, 1);
    }
}
