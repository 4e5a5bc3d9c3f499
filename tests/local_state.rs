use std::sync::Arc;

use tsr::state::{BackendError, LocalBackend, StateBackend};
use tsr::terraform::state::{StateDocument, StateFormatError};
use tsr::{
    Coordinator, InventoryProvider, PlanStatus, RemoteResource, ResourceAddress, ResourceLocator,
    RetryPolicy, Stack, StateLocator, TransferError, TransferRequest,
};

const DEV_STATE: &str = r#"{
  "version": 4,
  "terraform_version": "1.9.0",
  "serial": 3,
  "lineage": "2f6c1d3e-dev",
  "outputs": {},
  "resources": [
    {
      "module": "component.web",
      "mode": "managed",
      "type": "aws_instance",
      "name": "test",
      "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
      "instances": [
        {
          "schema_version": 1,
          "attributes": {"id": "i-0abc", "ami": "ami-1", "instance_type": "t3.micro"},
          "sensitive_attributes": [],
          "private": "eyJzY2hlbWFfdmVyc2lvbiI6IjEifQ==",
          "dependencies": ["component.web.aws_security_group.web"]
        }
      ]
    }
  ],
  "check_results": null
}"#;

fn loc(deployment: &str, name: &str) -> ResourceLocator {
    ResourceLocator::new(
        "webapp",
        deployment,
        "web",
        ResourceAddress::new("aws_instance", name),
    )
}

fn coordinator(dev: Arc<LocalBackend>, prod: Arc<LocalBackend>) -> Coordinator {
    let locator = StateLocator::new().with_stack(
        Stack::new("webapp")
            .with_component("web")
            .with_deployment("dev", dev)
            .with_deployment("prod", prod),
    );
    let provider = InventoryProvider::new([RemoteResource {
        resource_type: "aws_instance".to_string(),
        provider_id: "i-0abc".to_string(),
        attributes: serde_json::json!({"ami": "ami-1", "instance_type": "t3.micro"}),
    }]);
    Coordinator::new(locator, Box::new(provider)).with_retry_policy(RetryPolicy::no_retry())
}

#[tokio::test]
async fn test_transfer_between_state_files() {
    let dir = tempfile::tempdir().unwrap();
    let dev_path = dir.path().join("dev").join("terraform.tfstate");
    let prod_path = dir.path().join("prod").join("terraform.tfstate");
    std::fs::create_dir_all(dev_path.parent().unwrap()).unwrap();
    std::fs::write(&dev_path, DEV_STATE).unwrap();

    let dev = Arc::new(LocalBackend::new("webapp-dev", &dev_path));
    let prod = Arc::new(LocalBackend::new("webapp-prod", &prod_path));

    let mut coordinator = coordinator(dev.clone(), prod.clone());

    let report = coordinator
        .transfer(TransferRequest::new(
            loc("dev", "test"),
            loc("prod", "promoted"),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(report.status, PlanStatus::Applied);

    let dev_doc = StateDocument::parse(&std::fs::read_to_string(&dev_path).unwrap()).unwrap();
    assert_eq!(dev_doc.serial, 4);
    assert_eq!(dev_doc.lineage, "2f6c1d3e-dev");
    assert!(dev_doc.resources.is_empty());
    // fields this tool does not model are written back untouched
    assert!(dev_doc.extra.contains_key("check_results"));

    let prod_doc = StateDocument::parse(&std::fs::read_to_string(&prod_path).unwrap()).unwrap();
    assert_eq!(prod_doc.serial, 1);
    assert_eq!(prod_doc.resources.len(), 1);
    assert_eq!(prod_doc.resources[0].module.as_deref(), Some("component.web"));
    assert_eq!(prod_doc.resources[0].name, "promoted");
    let moved = &prod_doc.resources[0].instances[0];
    assert_eq!(moved.extra["private"], "eyJzY2hlbWFfdmVyc2lvbiI6IjEifQ==");
    assert_eq!(
        moved.extra["dependencies"],
        serde_json::json!(["component.web.aws_security_group.web"])
    );

    let promoted = prod
        .get(&loc("prod", "promoted").state_address())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promoted.provider_id, "i-0abc");

    assert!(!dev.lock_path().exists());
    assert!(!prod.lock_path().exists());
}

#[tokio::test]
async fn test_stale_lock_file_blocks_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let dev_path = dir.path().join("dev.tfstate");
    std::fs::write(&dev_path, DEV_STATE).unwrap();

    let dev = Arc::new(LocalBackend::new("webapp-dev", &dev_path));
    let prod = Arc::new(LocalBackend::new("webapp-prod", dir.path().join("prod.tfstate")));
    std::fs::write(
        dev.lock_path(),
        r#"{"ID": "held", "Operation": "OperationTypeApply", "Who": "bob@laptop"}"#,
    )
    .unwrap();

    let mut coordinator = coordinator(dev.clone(), prod.clone());

    let err = coordinator
        .transfer(TransferRequest::new(
            loc("dev", "test"),
            loc("prod", "promoted"),
            true,
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("bob@laptop"));

    // the state file is untouched and our own lock never appeared
    assert_eq!(std::fs::read_to_string(&dev_path).unwrap(), DEV_STATE);
    assert!(!prod.lock_path().exists());
}

#[tokio::test]
async fn test_failed_import_restores_source_file() {
    let dir = tempfile::tempdir().unwrap();
    let dev_path = dir.path().join("dev.tfstate");
    let prod_path = dir.path().join("prod.tfstate");
    std::fs::write(&dev_path, DEV_STATE).unwrap();
    // the destination cannot write its state file
    std::fs::create_dir(dir.path().join("prod.tfstate.tmp")).unwrap();

    let dev = Arc::new(LocalBackend::new("webapp-dev", &dev_path));
    let prod = Arc::new(LocalBackend::new("webapp-prod", &prod_path));
    let mut coordinator = coordinator(dev.clone(), prod.clone());

    let plan = coordinator
        .plan(TransferRequest::new(
            loc("dev", "test"),
            loc("prod", "promoted"),
            true,
        ))
        .await
        .unwrap();
    let err = coordinator.execute(plan.id).await.unwrap_err();
    assert!(matches!(err, TransferError::Backend { source: BackendError::Io { .. }, .. }));
    assert_eq!(
        coordinator.get_plan(plan.id).unwrap().status,
        PlanStatus::RolledBack
    );

    let original = StateDocument::parse(DEV_STATE).unwrap();
    let mut restored = StateDocument::parse(&std::fs::read_to_string(&dev_path).unwrap()).unwrap();
    assert_eq!(restored.serial, original.serial + 2);
    restored.serial = original.serial;
    assert_eq!(restored, original);

    assert!(!prod_path.exists());
    assert!(!dev.lock_path().exists());
    assert!(!prod.lock_path().exists());
}

#[tokio::test]
async fn test_counted_resource_is_refused_at_plan_time() {
    let dir = tempfile::tempdir().unwrap();
    let dev_path = dir.path().join("dev.tfstate");
    let counted = DEV_STATE.replace(
        r#""instances": ["#,
        r#""each": "list",
      "instances": [
        {"index_key": 1, "schema_version": 1, "attributes": {"id": "i-0def"}},"#,
    );
    std::fs::write(&dev_path, &counted).unwrap();

    let dev = Arc::new(LocalBackend::new("webapp-dev", &dev_path));
    let prod = Arc::new(LocalBackend::new("webapp-prod", dir.path().join("prod.tfstate")));
    let mut coordinator = coordinator(dev, prod);

    let err = coordinator
        .plan(TransferRequest::new(
            loc("dev", "test"),
            loc("prod", "promoted"),
            true,
        ))
        .await
        .unwrap_err();

    match err {
        TransferError::Backend {
            source: BackendError::InvalidState { source, .. },
            ..
        } => assert!(matches!(
            source,
            StateFormatError::MultipleInstances { count: 2, .. }
        )),
        other => panic!("Expected MultipleInstances, got {:?}", other),
    }
    assert_eq!(std::fs::read_to_string(&dev_path).unwrap(), counted);
}
