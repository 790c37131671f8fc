//! Deployment, versioning and duplicate filtering.

use procflow_engine::{
    DeploymentBuilder, EngineConfig, EngineError, ProcessEngine, Session, Variables,
};
use procflow_model::{DefinitionKind, ModelError};
use procflow_storage::InMemoryStorage;
use serde_json::json;

fn process(key: &str, task: &str) -> serde_json::Value {
    json!({ "kind": "Process", "key": key, "tasks": [{ "key": task }] })
}

fn named<'a>(engine: &'a ProcessEngine, task: &str) -> DeploymentBuilder<'a, InMemoryStorage> {
    engine
        .repository_service()
        .create_deployment()
        .name("invoices")
        .add_json_resource("invoice.json", &process("invoice", task))
}

#[test]
fn identical_named_deployment_is_filtered() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    let system = Session::new();
    let first = named(&engine, "check").deploy(&system).unwrap();
    let second = named(&engine, "check").deploy(&system).unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.repository_service().deployments().unwrap().len(), 1);
    assert_eq!(engine.repository_service().definition("invoice").unwrap().version, 1);
}

#[test]
fn changed_resources_produce_a_new_version() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    let system = Session::new();
    let first = named(&engine, "check").deploy(&system).unwrap();
    let second = named(&engine, "approve").deploy(&system).unwrap();

    assert_ne!(first.id, second.id);
    assert_ne!(first.checksum, second.checksum);
    let latest = engine.repository_service().definition("invoice").unwrap();
    assert_eq!(latest.version, 2);
    assert_eq!(latest.deployment_id, second.id);
    assert_eq!(latest.id, format!("invoice:2:{}", second.id));

    let versions: Vec<u32> = engine
        .repository_service()
        .process_definitions()
        .unwrap()
        .iter()
        .map(|d| d.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);
}

#[test]
fn versions_are_counted_per_kind() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    let system = Session::new();
    named(&engine, "check").deploy(&system).unwrap();
    let case = engine
        .repository_service()
        .create_deployment()
        .add_json_resource("invoice-case.json", &json!({ "kind": "Case", "key": "invoice" }))
        .deploy(&system)
        .unwrap();

    let cases = engine.repository_service().case_definitions().unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].version, 1);
    assert_eq!(cases[0].id, format!("invoice:1:{}", case.id));
}

#[test]
fn new_instances_use_the_latest_version() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    let system = Session::new();
    named(&engine, "check").deploy(&system).unwrap();
    let v2 = named(&engine, "approve").deploy(&system).unwrap();

    let pi = engine
        .runtime_service()
        .start_process_instance_by_key(&system, "invoice", Variables::new())
        .unwrap();
    assert_eq!(pi.definition_id, v2.definition_ids[0]);
    let task = engine
        .task_service()
        .task_query()
        .process_instance_id(&pi.id)
        .single_result(&system)
        .unwrap()
        .unwrap();
    assert_eq!(task.task_definition_key, "approve");
}

#[test]
fn filtering_can_be_disabled_per_deployment() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    let system = Session::new();
    named(&engine, "check").deploy(&system).unwrap();
    named(&engine, "check")
        .enable_duplicate_filtering(false)
        .deploy(&system)
        .unwrap();
    assert_eq!(engine.repository_service().deployments().unwrap().len(), 2);
    assert_eq!(engine.repository_service().definition("invoice").unwrap().version, 2);
}

#[test]
fn filtering_can_be_disabled_in_config() {
    let engine = ProcessEngine::in_memory(EngineConfig {
        deployment_duplicate_filtering: false,
        ..EngineConfig::default()
    });
    let system = Session::new();
    named(&engine, "check").deploy(&system).unwrap();
    named(&engine, "check").deploy(&system).unwrap();
    assert_eq!(engine.repository_service().deployments().unwrap().len(), 2);
}

#[test]
fn unnamed_deployments_are_never_filtered() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    let system = Session::new();
    for _ in 0..2 {
        engine
            .repository_service()
            .create_deployment()
            .add_json_resource("invoice.json", &process("invoice", "check"))
            .deploy(&system)
            .unwrap();
    }
    assert_eq!(engine.repository_service().deployments().unwrap().len(), 2);
}

#[test]
fn invalid_json_is_rejected() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    let err = engine
        .repository_service()
        .create_deployment()
        .add_resource("broken.json", "{ not json")
        .deploy(&Session::new())
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Definition(ModelError::Json { ref resource, .. }) if resource == "broken.json"
    ));
    assert!(engine.repository_service().deployments().unwrap().is_empty());
}

#[test]
fn unresolved_companion_case_is_rejected() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    let err = engine
        .repository_service()
        .create_deployment()
        .add_json_resource(
            "p.json",
            &json!({ "kind": "Process", "key": "p", "companion_case": "missing" }),
        )
        .deploy(&Session::new())
        .unwrap_err();
    match err {
        EngineError::Definition(ModelError::UnresolvedCompanionCase {
            process_key,
            case_key,
        }) => {
            assert_eq!(process_key, "p");
            assert_eq!(case_key, "missing");
        }
        other => panic!("expected UnresolvedCompanionCase, got {other:?}"),
    }
}

#[test]
fn companion_case_may_come_from_an_earlier_deployment() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    let system = Session::new();
    engine
        .repository_service()
        .create_deployment()
        .add_json_resource("c.json", &json!({ "kind": "Case", "key": "c" }))
        .deploy(&system)
        .unwrap();
    engine
        .repository_service()
        .create_deployment()
        .add_json_resource(
            "p.json",
            &json!({ "kind": "Process", "key": "p", "companion_case": "c" }),
        )
        .deploy(&system)
        .unwrap();

    let definition = engine.repository_service().definition("c").unwrap();
    assert_eq!(definition.kind, DefinitionKind::Case);
    assert_eq!(engine.repository_service().case_definitions().unwrap().len(), 1);
}

#[test]
fn empty_deployment_is_rejected() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    assert!(matches!(
        engine
            .repository_service()
            .create_deployment()
            .name("empty")
            .deploy(&Session::new()),
        Err(EngineError::InvalidArgument(_))
    ));
}

#[test]
fn unknown_definition_is_not_found() {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    assert!(matches!(
        engine.repository_service().definition("nope"),
        Err(EngineError::NotFound { kind: "definition", .. })
    ));
    assert!(matches!(
        engine
            .runtime_service()
            .start_process_instance_by_key(&Session::new(), "nope", Variables::new()),
        Err(EngineError::NotFound { kind: "process definition", .. })
    ));
}
