//! End-to-end orchestration over configured mock services.

use serde_json::json;

use volplane::{
    AttachmentsMask, DriverRegistry, Error, InstanceId, LocalDevices, Orchestrator,
    RequestContext, ServerConfig, Task, TaskState, VolumeAttachOpts, VolumeDetachOpts,
};

const THREE_SERVICES: &str = r#"
    [server]
    task_retention_secs = 0

    [services.alpha]
    driver = "mock"

    [[services.alpha.options.volumes]]
    id = "vol-a"
    name = "alpha-data"
    size = 10

    [services.bravo]
    driver = "mock"

    [services.bravo.options]
    fail = "backend down"

    [services.charlie]
    driver = "mock"

    [[services.charlie.options.volumes]]
    id = "vol-c"
    name = "charlie-data"
    size = 30
"#;

fn orchestrator(toml: &str) -> Orchestrator {
    let config = ServerConfig::from_toml(toml).unwrap();
    Orchestrator::from_config(&config, &DriverRegistry::with_builtin()).unwrap()
}

async fn finish(orchestrator: &Orchestrator, task: Task) -> Task {
    orchestrator.tasks().wait(task.id).await.unwrap()
}

// ─── Fan-out ────────────────────────────────────────────────────────────────

mod fan_out_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_one_failing_service_fails_the_batch_with_partials() {
        let orch = orchestrator(THREE_SERVICES);
        let task = orch
            .volumes(&RequestContext::new(), AttachmentsMask::NONE, None)
            .unwrap();
        let done = finish(&orch, task).await;

        assert_eq!(done.state, TaskState::Error);
        let Some(Error::BatchProcess { completed, source }) = done.error else {
            panic!("expected a batch error, got {:?}", done.error);
        };
        assert_eq!(
            completed.keys().cloned().collect::<Vec<_>>(),
            vec!["alpha", "charlie"]
        );
        assert_eq!(completed["alpha"]["vol-a"]["name"], json!("alpha-data"));
        assert_eq!(completed["charlie"]["vol-c"]["size"], json!(30));
        assert_eq!(source.to_string(), "mock: backend down");
    }

    #[tokio::test]
    async fn test_every_partial_is_a_task_of_its_own() {
        let orch = orchestrator(THREE_SERVICES);
        let task = orch.snapshots(&RequestContext::new(), None).unwrap();
        finish(&orch, task.clone()).await;

        let tasks = orch.tasks().tasks();
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks.last().unwrap().id, task.id);
        let failed: Vec<_> = tasks
            .iter()
            .filter(|t| t.state == TaskState::Error)
            .collect();
        assert_eq!(failed.len(), 2);
    }

    #[tokio::test]
    async fn test_filter_applies_to_every_service() {
        let orch = orchestrator(&THREE_SERVICES.replace("fail = \"backend down\"", ""));
        let task = orch
            .volumes(&RequestContext::new(), AttachmentsMask::NONE, Some("(size>=20)"))
            .unwrap();
        let done = finish(&orch, task).await;

        assert_eq!(done.state, TaskState::Success);
        assert_eq!(
            done.result.unwrap(),
            json!({
                "alpha": {},
                "bravo": {},
                "charlie": {
                    "vol-c": { "id": "vol-c", "name": "charlie-data", "size": 30 }
                }
            })
        );
    }

    #[tokio::test]
    async fn test_missing_instance_id_fails_only_that_service() {
        let orch = orchestrator(&THREE_SERVICES.replace("fail = \"backend down\"", ""));
        let ctx = RequestContext::new().with_instance_id("alpha", InstanceId::new("mock", "i-1"));
        let task = orch
            .volumes(&ctx, AttachmentsMask::FOR_INSTANCE, None)
            .unwrap();
        let done = finish(&orch, task).await;

        let Some(Error::BatchProcess { completed, source }) = done.error else {
            panic!("expected a batch error, got {:?}", done.error);
        };
        assert!(completed.contains_key("alpha"));
        assert!(matches!(
            source.as_ref(),
            Error::MissingInstanceId { service } if service == "bravo"
        ));
    }
}

// ─── Attach and Detach ──────────────────────────────────────────────────────

mod attachment_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ONE_SERVICE: &str = r#"
        [services.local]
        driver = "mock"

        [[services.local.options.volumes]]
        id = "vol-1"
        name = "data"

        [[services.local.options.volumes]]
        id = "vol-2"
        name = "logs"
    "#;

    fn caller() -> RequestContext {
        RequestContext::new()
            .with_user("ops")
            .with_instance_id("local", InstanceId::new("mock", "i-1"))
    }

    #[tokio::test]
    async fn test_attach_requires_instance_id_upfront() {
        let orch = orchestrator(ONE_SERVICE);
        let err = orch
            .volume_attach(&RequestContext::new(), "local", "vol-1", VolumeAttachOpts::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingInstanceId { .. }));
        assert!(orch.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_attached_volumes_resolve_for_the_caller() {
        let orch = orchestrator(ONE_SERVICE);
        let ctx = caller();
        let attach = orch
            .volume_attach(&ctx, "LOCAL", "vol-1", VolumeAttachOpts::default())
            .unwrap();
        assert_eq!(finish(&orch, attach).await.state, TaskState::Success);

        let mine = orch
            .volumes_for_service(&ctx, "local", AttachmentsMask::ATTACHED_TO_INSTANCE, None)
            .unwrap();
        let result = finish(&orch, mine).await.result.unwrap();
        assert_eq!(result["vol-1"]["attachmentState"], json!("attached"));
        assert!(result.get("vol-2").is_none());

        let other = RequestContext::new().with_instance_id("local", InstanceId::new("mock", "i-2"));
        let free = orch
            .volumes_for_service(&other, "local", AttachmentsMask::ONLY_UNATTACHED, None)
            .unwrap();
        let result = finish(&orch, free).await.result.unwrap();
        assert_eq!(
            result.as_object().unwrap().keys().collect::<Vec<_>>(),
            vec!["vol-2"]
        );
    }

    #[tokio::test]
    async fn test_detach_all_releases_every_caller_volume() {
        let orch = orchestrator(ONE_SERVICE);
        let ctx = caller();
        for id in ["vol-1", "vol-2"] {
            let attach = orch
                .volume_attach(&ctx, "local", id, VolumeAttachOpts::default())
                .unwrap();
            finish(&orch, attach).await;
        }

        let detach = orch.volume_detach_all(&ctx, VolumeDetachOpts::default());
        let done = finish(&orch, detach).await;
        assert_eq!(done.state, TaskState::Success);
        let detached = &done.result.unwrap()["local"];
        assert_eq!(detached.as_object().unwrap().len(), 2);
        assert_eq!(detached["vol-1"]["attachmentState"], json!("available"));

        let attached = orch
            .volumes_for_service(&ctx, "local", AttachmentsMask::ONLY_ATTACHED, None)
            .unwrap();
        assert_eq!(finish(&orch, attached).await.result.unwrap(), json!({}));
    }

    fn elsewhere() -> RequestContext {
        RequestContext::new().with_instance_id("local", InstanceId::new("mock", "i-2"))
    }

    async fn attach_xvdf(orch: &Orchestrator) {
        let opts = VolumeAttachOpts {
            next_device: Some("/dev/xvdf".to_string()),
            ..VolumeAttachOpts::default()
        };
        let attach = orch
            .volume_attach(&elsewhere(), "local", "vol-1", opts)
            .unwrap();
        assert_eq!(finish(orch, attach).await.state, TaskState::Success);
    }

    #[tokio::test]
    async fn test_device_names_hidden_without_devices() {
        let orch = orchestrator(ONE_SERVICE);
        attach_xvdf(&orch).await;

        let mask = AttachmentsMask::ONLY_ATTACHED;
        let listed = orch
            .volumes_for_service(&elsewhere(), "local", mask, None)
            .unwrap();
        let result = finish(&orch, listed).await.result.unwrap();
        let attachment = &result["vol-1"]["attachments"][0];
        assert_eq!(attachment["instanceID"]["id"], json!("i-2"));
        assert!(attachment.get("deviceName").is_none());
    }

    #[tokio::test]
    async fn test_device_names_shown_for_local_devices() {
        let orch = orchestrator(ONE_SERVICE);
        attach_xvdf(&orch).await;

        let devices = LocalDevices::new("mock").with_device("/dev/xvdf", "/mnt/data");
        let ctx = elsewhere().with_local_devices("local", devices);
        let mask = AttachmentsMask::WITH_DEVICES_FOR_INSTANCE;
        let inspect = orch
            .volume_inspect(&ctx, "local", "vol-1", false, mask)
            .unwrap();
        let result = finish(&orch, inspect).await.result.unwrap();
        assert_eq!(result["attachments"][0]["deviceName"], json!("/dev/xvdf"));
    }

    #[tokio::test]
    async fn test_devices_require_local_devices() {
        let orch = orchestrator(ONE_SERVICE);
        attach_xvdf(&orch).await;

        let inspect = orch
            .volume_inspect(
                &elsewhere(),
                "local",
                "vol-1",
                false,
                AttachmentsMask::WITH_DEVICES_FOR_INSTANCE,
            )
            .unwrap();
        let done = finish(&orch, inspect).await;
        assert_eq!(done.state, TaskState::Error);
        assert!(
            matches!(&done.error, Some(Error::MissingLocalDevices { service }) if service == "local"),
            "unexpected error: {:?}",
            done.error
        );
    }

    #[tokio::test]
    async fn test_unrequested_attachments_are_stripped() {
        let orch = orchestrator(ONE_SERVICE);
        attach_xvdf(&orch).await;

        // unattached volumes wanted, but no attachment information requested
        let mask = AttachmentsMask::UNATTACHED;
        let listed = orch
            .volumes_for_service(&RequestContext::new(), "local", mask, None)
            .unwrap();
        let result = finish(&orch, listed).await.result.unwrap();
        assert!(result["vol-1"].get("attachments").is_none());
        assert_eq!(result["vol-1"]["attachmentState"], json!("available"));
        assert!(result["vol-2"].get("attachments").is_none());
    }
}

// ─── Configuration ──────────────────────────────────────────────────────────

mod config_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_driver_is_rejected() {
        let config = ServerConfig::from_toml("[services.s3]\ndriver = \"nope\"").unwrap();
        let err = Orchestrator::from_config(&config, &DriverRegistry::with_builtin()).unwrap_err();
        assert!(matches!(err, Error::UnknownDriver { ref name } if name == "nope"));
    }

    #[tokio::test]
    async fn test_services_are_listed_by_name() {
        let orch = orchestrator(THREE_SERVICES);
        let names: Vec<String> = orch.service_infos().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
        assert!(matches!(
            orch.service_inspect("delta"),
            Err(Error::UnknownService { .. })
        ));
    }
}
