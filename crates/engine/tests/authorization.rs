//! Authorization integration tests.
//!
//! A user whose group may start `testProcess` and read its tasks, but holds
//! no task update permission, must be refused every task mutation, and the
//! refusal must leave the engine unchanged.

use procflow_engine::{
    Authentication, AuthorizationType, EngineConfig, EngineError, NewAttachment, NewGroup, NewUser,
    Permission, ProcessEngine, Resource, Session, Variables, ANY,
};
use serde_json::json;

const USER: &str = "testUser";
const GROUP: &str = "testGroup";
const PROCESS: &str = "testProcess";

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

fn deploy(engine: &ProcessEngine) {
    engine
        .repository_service()
        .create_deployment()
        .name("simple")
        .add_json_resource(
            "testProcess.json",
            &json!({
                "kind": "Process",
                "key": PROCESS,
                "tasks": [{ "key": "userTask", "name": "User Task" }]
            }),
        )
        .deploy(&Session::new())
        .unwrap();
}

/// Engine with the user, the group, the membership and the two grants of
/// the attachment scenario, and authorization switched on.
fn setup() -> ProcessEngine {
    let engine = ProcessEngine::in_memory(EngineConfig::default());
    deploy(&engine);
    let system = Session::new();

    let identity = engine.identity_service();
    identity.create_user(&system, NewUser::new(USER)).unwrap();
    identity.create_group(&system, NewGroup::new(GROUP)).unwrap();
    identity.create_membership(&system, USER, GROUP).unwrap();

    engine.set_authorization_enabled(true);

    let authz = engine.authorization_service();
    let definition_grant = authz
        .create_new_authorization(AuthorizationType::Grant)
        .group_id(GROUP)
        .resource(Resource::ProcessDefinition)
        .resource_id(PROCESS)
        .add_permission(Permission::Read)
        .add_permission(Permission::CreateInstance)
        .add_permission(Permission::ReadTask);
    let instance_grant = authz
        .create_new_authorization(AuthorizationType::Grant)
        .group_id(GROUP)
        .resource(Resource::ProcessInstance)
        .resource_id(ANY)
        .add_permission(Permission::Create);
    authz.save_authorization(&system, definition_grant).unwrap();
    authz.save_authorization(&system, instance_grant).unwrap();

    engine
}

fn user_session() -> Session {
    let mut session = Session::new();
    session.set_authentication(Authentication::new(USER, [GROUP]));
    session
}

fn assert_denied<T: std::fmt::Debug>(result: Result<T, EngineError>) {
    match result {
        Err(EngineError::Authorization { user_id, missing }) => {
            assert_eq!(user_id, USER);
            assert!(!missing.is_empty());
        }
        other => panic!("expected authorization error, got {other:?}"),
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[test]
fn attachment_and_variable_updates_are_denied() {
    let engine = setup();
    let session = user_session();

    let current = session.current_authentication().unwrap();
    assert_eq!(current.group_ids, vec![GROUP.to_string()]);

    let pi = engine
        .runtime_service()
        .start_process_instance_by_key(&session, PROCESS, Variables::new())
        .unwrap();

    let task = engine
        .task_service()
        .task_query()
        .execution_id(&pi.id)
        .single_result(&session)
        .unwrap()
        .expect("task visible through READ_TASK");

    assert_denied(
        engine
            .task_service()
            .set_variable(&session, &task.id, "test", json!("test")),
    );
    assert_denied(
        engine.task_service().create_attachment(
            &session,
            NewAttachment::new("link", "title")
                .task(&task.id)
                .process_instance(&pi.id)
                .description("desc")
                .url("url"),
        ),
    );
}

#[test]
fn denied_mutations_leave_state_unchanged() {
    let engine = setup();
    let session = user_session();
    let system = Session::new();
    let pi = engine
        .runtime_service()
        .start_process_instance_by_key(&session, PROCESS, Variables::new())
        .unwrap();
    let task = engine
        .task_service()
        .task_query()
        .process_instance_id(&pi.id)
        .single_result(&system)
        .unwrap()
        .unwrap();
    let generation = engine.storage().generation().unwrap();

    assert_denied(
        engine
            .task_service()
            .set_variable(&session, &task.id, "test", json!("test")),
    );
    assert_denied(engine.task_service().create_attachment(
        &session,
        NewAttachment::new("link", "title").task(&task.id),
    ));
    assert_denied(engine.task_service().complete(&session, &task.id, Variables::new()));
    assert_denied(
        engine
            .runtime_service()
            .delete_process_instance(&session, &pi.id, None),
    );

    assert_eq!(engine.storage().generation().unwrap(), generation);
    assert!(engine
        .runtime_service()
        .variables(&system, &pi.id)
        .unwrap()
        .is_empty());
    assert!(engine
        .task_service()
        .task_attachments(&system, &task.id)
        .unwrap()
        .is_empty());
}

#[test]
fn task_work_grant_allows_updates() {
    let engine = setup();
    let session = user_session();
    let system = Session::new();
    let pi = engine
        .runtime_service()
        .start_process_instance_by_key(&session, PROCESS, Variables::new())
        .unwrap();
    let task = engine
        .task_service()
        .task_query()
        .process_instance_id(&pi.id)
        .single_result(&system)
        .unwrap()
        .unwrap();

    let authz = engine.authorization_service();
    let grant = authz
        .create_new_authorization(AuthorizationType::Grant)
        .user_id(USER)
        .resource(Resource::Task)
        .resource_id(&task.id)
        .add_permission(Permission::TaskWork);
    authz.save_authorization(&system, grant).unwrap();

    engine
        .task_service()
        .set_variable(&session, &task.id, "test", json!("test"))
        .unwrap();
    assert_eq!(
        engine.runtime_service().variables(&system, &pi.id).unwrap()["test"],
        json!("test")
    );
}

#[test]
fn start_requires_both_grants() {
    let engine = ProcessEngine::in_memory(EngineConfig {
        authorization_enabled: true,
        ..EngineConfig::default()
    });
    deploy(&engine);
    let system = Session::new();
    engine
        .identity_service()
        .create_user(&system, NewUser::new(USER))
        .unwrap();
    let authz = engine.authorization_service();
    let grant = authz
        .create_new_authorization(AuthorizationType::Grant)
        .user_id(USER)
        .resource(Resource::ProcessDefinition)
        .resource_id(PROCESS)
        .add_permission(Permission::CreateInstance);
    authz.save_authorization(&system, grant).unwrap();

    let session = Session::authenticated(Authentication::new(USER, Vec::<String>::new()));
    let err = engine
        .runtime_service()
        .start_process_instance_by_key(&session, PROCESS, Variables::new())
        .unwrap_err();
    match err {
        EngineError::Authorization { missing, .. } => {
            assert_eq!(missing.len(), 1);
            assert_eq!(missing[0].resource, Resource::ProcessInstance);
            assert_eq!(missing[0].permission, Permission::Create);
            assert_eq!(missing[0].resource_id, ANY);
        }
        other => panic!("expected authorization error, got {other:?}"),
    }
    assert_eq!(
        engine
            .runtime_service()
            .process_instance_query()
            .count(&system)
            .unwrap(),
        0
    );
}

#[test]
fn queries_hide_what_the_user_cannot_read() {
    let engine = setup();
    let session = user_session();
    let system = Session::new();
    engine
        .runtime_service()
        .start_process_instance_by_key(&system, PROCESS, Variables::new())
        .unwrap();

    // READ_TASK on the definition shows the task; nothing grants
    // READ_INSTANCE, so the instance stays hidden.
    assert_eq!(engine.task_service().task_query().count(&session).unwrap(), 1);
    assert_eq!(
        engine
            .runtime_service()
            .process_instance_query()
            .count(&session)
            .unwrap(),
        0
    );
    assert_eq!(
        engine
            .runtime_service()
            .process_instance_query()
            .count(&system)
            .unwrap(),
        1
    );
}

#[test]
fn disabling_authorization_lifts_every_check() {
    let engine = setup();
    let session = user_session();
    let pi = engine
        .runtime_service()
        .start_process_instance_by_key(&session, PROCESS, Variables::new())
        .unwrap();
    let task = engine
        .task_service()
        .task_query()
        .process_instance_id(&pi.id)
        .single_result(&session)
        .unwrap()
        .unwrap();

    engine.set_authorization_enabled(false);
    engine
        .task_service()
        .set_variable(&session, &task.id, "test", json!("test"))
        .unwrap();
}

#[test]
fn admin_group_members_bypass_grants() {
    let engine = ProcessEngine::in_memory(EngineConfig {
        authorization_enabled: true,
        admin_groups: vec!["admins".to_string()],
        ..EngineConfig::default()
    });
    deploy(&engine);
    let admin = Session::authenticated(Authentication::new("root", ["admins"]));
    engine
        .runtime_service()
        .start_process_instance_by_key(&admin, PROCESS, Variables::new())
        .unwrap();
}

#[test]
fn grants_must_name_existing_subjects() {
    let engine = setup();
    let authz = engine.authorization_service();
    let grant = authz
        .create_new_authorization(AuthorizationType::Grant)
        .group_id("nobody")
        .resource(Resource::Task)
        .add_permission(Permission::Read);
    let err = authz
        .save_authorization(&Session::new(), grant)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "group", .. }));

    let empty = authz
        .create_new_authorization(AuthorizationType::Grant)
        .user_id(USER)
        .resource(Resource::Task);
    assert!(matches!(
        authz.save_authorization(&Session::new(), empty),
        Err(EngineError::InvalidArgument(_))
    ));
}

#[test]
fn grants_cannot_name_every_user_or_group() {
    let engine = setup();
    let authz = engine.authorization_service();
    let every_user = authz
        .create_new_authorization(AuthorizationType::Grant)
        .user_id(ANY)
        .resource(Resource::Task)
        .add_permission(Permission::Read);
    assert!(matches!(
        authz.save_authorization(&Session::new(), every_user),
        Err(EngineError::InvalidArgument(_))
    ));
    let every_group = authz
        .create_new_authorization(AuthorizationType::Grant)
        .group_id(ANY)
        .resource(Resource::Task)
        .add_permission(Permission::Read);
    assert!(matches!(
        authz.save_authorization(&Session::new(), every_group),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(!authz
        .is_user_authorized("alice", &[], Permission::Read, Resource::Task, "42")
        .unwrap());

    let global = authz
        .create_new_authorization(AuthorizationType::Global)
        .resource(Resource::Task)
        .add_permission(Permission::Read);
    authz.save_authorization(&Session::new(), global).unwrap();
    assert!(authz
        .is_user_authorized("alice", &[], Permission::Read, Resource::Task, "42")
        .unwrap());
}

#[test]
fn authorization_service_answers_for_a_user() {
    let engine = setup();
    let authz = engine.authorization_service();
    let groups = vec![GROUP.to_string()];
    assert!(authz
        .is_user_authorized(USER, &groups, Permission::Create, Resource::ProcessInstance, "17")
        .unwrap());
    assert!(!authz
        .is_user_authorized(USER, &groups, Permission::Delete, Resource::ProcessInstance, "17")
        .unwrap());
    assert_eq!(authz.authorizations_for(USER, &groups).unwrap().len(), 2);
    assert!(authz.authorizations_for(USER, &[]).unwrap().is_empty());
}
