//! Integration tests for domain construction, rollback and teardown.

use std::time::Duration;

use domkit::{ConfigError, DomHandle, DomainError, DomainRuntime, DomainStatus, Node, RuntimeOptions};
use domkit::hypervisor::{DeviceRequest, Segment};
use domkit_test_utils::{
    KernelFiles, TestPlatform, device, e2e_config, minimal_config, test_options, vbd,
};

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Fake platform plus a runtime wired to it.
struct TestContext {
    fakes: TestPlatform,
    runtime: DomainRuntime,
}

impl TestContext {
    fn new() -> Self {
        let fakes = TestPlatform::new();
        let runtime = fakes.runtime();
        Self { fakes, runtime }
    }

    fn with_options(options: RuntimeOptions) -> Self {
        let fakes = TestPlatform::new();
        let runtime = fakes.runtime_with(options);
        Self { fakes, runtime }
    }
}

// ============================================================================
// CONFIGURATION ERRORS
// ============================================================================

#[tokio::test]
async fn missing_name_makes_no_hypervisor_calls() {
    let ctx = TestContext::new();
    let config = Node::list("vm", [Node::field("memory", 64)]);

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(matches!(err, DomainError::Config(ConfigError::MissingName)));
    assert!(ctx.fakes.control.creates().is_empty());
    assert!(ctx.fakes.control.destroys().is_empty());
    assert!(ctx.runtime.list().is_empty());
}

#[tokio::test]
async fn missing_memory_makes_no_hypervisor_calls() {
    let ctx = TestContext::new();
    let config = Node::list("vm", [Node::field("name", "vm1")]);

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(matches!(err, DomainError::Config(ConfigError::MissingMemory)));
    assert!(ctx.fakes.control.creates().is_empty());
}

#[tokio::test]
async fn zero_memory_makes_no_hypervisor_calls() {
    let ctx = TestContext::new();
    let config = Node::list("vm", [Node::field("name", "vm1"), Node::field("memory", 0)]);

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::Config(ConfigError::InvalidMemory(ref raw)) if raw == "0"
    ));
    assert!(ctx.fakes.control.creates().is_empty());
    assert!(ctx.runtime.list().is_empty());
}

#[tokio::test]
async fn unknown_image_type_runs_no_device_handlers() {
    let ctx = TestContext::new();
    let config = Node::list(
        "vm",
        [
            Node::field("name", "vm1"),
            Node::field("memory", 64),
            Node::list("image", [Node::list("plan9", [Node::field("kernel", "/boot/k")])]),
            device(Node::tag("vif")),
        ],
    );

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::Config(ConfigError::UnknownImageType(ref name)) if name == "plan9"
    ));
    assert!(ctx.fakes.control.creates().is_empty());
    assert!(ctx.fakes.netif.requests().is_empty());
}

#[tokio::test]
async fn unknown_device_type_destroys_created_domain() {
    let ctx = TestContext::new();
    let config = minimal_config("vm1", 64).with(device(Node::tag("usb")));

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::Config(ConfigError::UnknownDeviceType(ref kind)) if kind == "usb"
    ));
    assert_eq!(ctx.fakes.control.destroys(), vec![DomHandle(1)]);
}

#[tokio::test]
async fn missing_kernel_file_is_reported_when_checks_enabled() {
    let ctx = TestContext::with_options(RuntimeOptions {
        check_boot_files: true,
        ..test_options()
    });
    let config = minimal_config("vm1", 64);

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("Kernel image does not exist: /boot/k"));
    assert!(ctx.fakes.control.creates().is_empty());
}

#[tokio::test]
async fn existing_boot_files_pass_checks() {
    let ctx = TestContext::with_options(RuntimeOptions {
        check_boot_files: true,
        ..test_options()
    });
    let files = KernelFiles::new().expect("Failed to write boot files");
    let config = Node::list(
        "vm",
        [
            Node::field("name", "vm1"),
            Node::field("memory", 32),
            files.image(),
        ],
    );

    let domain = ctx.runtime.create(config).await.expect("create failed");
    let builds = ctx.fakes.control.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].kernel, files.kernel);
    assert_eq!(builds[0].ramdisk.as_deref(), Some(files.ramdisk.as_path()));
    assert_eq!(domain.boot_image().map(|image| image.kernel), Some(files.kernel.clone()));
}

// ============================================================================
// HYPERVISOR FAILURES
// ============================================================================

#[tokio::test]
async fn failed_allocation_skips_teardown_of_hypervisor_domain() {
    let ctx = TestContext::new();
    ctx.fakes.control.fail_create();

    let err = ctx.runtime.create(e2e_config()).await.unwrap_err();
    assert!(matches!(err, DomainError::Resource(_)));
    assert!(err.to_string().contains("Creating domain failed: name=vm1 memory=64"));
    assert!(ctx.fakes.control.destroys().is_empty());
    assert!(ctx.fakes.netif.requests().is_empty());
}

#[tokio::test]
async fn failed_build_destroys_domain() {
    let ctx = TestContext::new();
    ctx.fakes.control.set_build_rc(-22);

    let err = ctx.runtime.create(e2e_config()).await.unwrap_err();
    assert!(err.to_string().contains("Building domain failed: type=linux dom=1 err=-22"));
    assert_eq!(ctx.fakes.control.destroys(), vec![DomHandle(1)]);
    assert_eq!(ctx.fakes.consoles.closed(), vec![DomHandle(1)]);
}

#[tokio::test]
async fn failing_device_rolls_back_once() {
    let ctx = TestContext::new();
    ctx.fakes.netif.fail_create_at(1);
    let config = e2e_config().with(device(Node::tag("vif")));

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(matches!(err, DomainError::Resource(_)));
    assert_eq!(ctx.fakes.control.destroys(), vec![DomHandle(1)]);
    assert!(ctx.fakes.netif.destroy_all_calls().contains(&DomHandle(1)));
    assert!(ctx.fakes.blkif.destroy_all_calls().contains(&DomHandle(1)));
    assert!(ctx.runtime.list().is_empty());
}

#[tokio::test]
async fn late_device_is_destroyed_after_rollback() {
    let ctx = TestContext::new();
    ctx.fakes
        .netif
        .delay_create(0, Duration::from_millis(100));
    // `sdc` spans two extents, so the vbd fails straight away.
    let config = minimal_config("vm1", 64)
        .with(device(Node::tag("vif")))
        .with(device(vbd("phy:sdc", "hda1")));

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(err.is_segment());
    assert_eq!(ctx.fakes.control.destroys(), vec![DomHandle(1)]);

    // The vif handler is still running; once it finishes its device must
    // be torn down instead of attached.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let late = ctx
        .fakes
        .netif
        .device(DomHandle(1), 0)
        .expect("vif should have been created");
    assert!(late.is_destroyed());
    assert_eq!(ctx.fakes.control.destroys().len(), 1);
}

// ============================================================================
// END TO END
// ============================================================================

#[tokio::test]
async fn create_attaches_devices_in_declared_order() {
    let ctx = TestContext::new();

    let domain = ctx.runtime.create(e2e_config()).await.expect("create failed");
    assert_eq!(domain.status(), DomainStatus::Active);
    assert_eq!(domain.dom(), Some(DomHandle(1)));
    assert_eq!(domain.name().as_deref(), Some("vm1"));
    assert_eq!(domain.memory_mib(), 64);
    assert!(domain.start_time().is_some());

    let creates = ctx.fakes.control.creates();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].memory_kib, 64 * 1024);
    assert_eq!(creates[0].cpu, -1);

    let builds = ctx.fakes.control.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].os_type, "linux");
    assert_eq!(builds[0].cmdline, "ip=dhcp");
    assert_eq!(builds[0].control_channel, 101);
    assert_eq!(builds[0].flags, 0);

    let vifs = domain.get_devices("vif");
    assert_eq!(vifs.len(), 1);
    assert_eq!(vifs[0].index(), 0);
    assert_eq!(vifs[0].handle().id().as_deref(), Some("vif1.0"));
    let vif = ctx.fakes.netif.device(DomHandle(1), 0).expect("vif missing");
    assert!(vif.is_up());

    let vbds = domain.get_devices("vbd");
    assert_eq!(vbds.len(), 1);
    assert_eq!(vbds[0].index(), 0);
    assert_eq!(
        ctx.fakes.blkif.requests()[0].2,
        DeviceRequest::Block {
            vdev: 0x301,
            mode: "r".to_string(),
            segment: Segment::whole_disk(0x801),
        }
    );

    assert_eq!(domain.console().map(|console| console.port), Some(9601));
    assert!(ctx.runtime.get_by_name("vm1").is_some());
    assert_eq!(ctx.runtime.list().len(), 1);
}

#[tokio::test]
async fn backend_domain_registers_as_control_domain() {
    let ctx = TestContext::new();
    let config = minimal_config("netbe", 32).with(Node::list("backend", [Node::tag("netif")]));

    let domain = ctx.runtime.create(config).await.expect("create failed");
    assert!(domain.is_netif_backend());
    assert_eq!(ctx.fakes.netif.control_domains(), vec![DomHandle(1)]);
    assert!(ctx.fakes.blkif.has_controller(DomHandle(1)));
    assert_ne!(ctx.fakes.control.builds()[0].flags, 0);
}

#[tokio::test]
async fn console_port_from_config() {
    let ctx = TestContext::new();
    let config = minimal_config("vm1", 32).with(Node::field("console", 9700));

    let domain = ctx.runtime.create(config).await.expect("create failed");
    assert_eq!(domain.console().map(|console| console.port), Some(9700));
}

// ============================================================================
// TEARDOWN
// ============================================================================

#[tokio::test]
async fn destroy_twice_calls_hypervisor_once() {
    let ctx = TestContext::new();
    let domain = ctx.runtime.create(e2e_config()).await.expect("create failed");
    let id = domain.id().to_string();

    ctx.runtime.destroy(&id).await.expect("destroy failed");
    domain.destroy().await.expect("second destroy failed");

    assert!(domain.is_terminated());
    assert!(domain.get_devices("vif").is_empty());
    assert_eq!(ctx.fakes.control.destroys(), vec![DomHandle(1)]);
    let vif = ctx.fakes.netif.device(DomHandle(1), 0);
    assert!(vif.is_none());
    assert!(ctx.runtime.get(&id).is_none());

    let err = ctx.runtime.destroy(&id).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));
}

#[tokio::test]
async fn directly_destroyed_domain_leaves_listing() {
    let ctx = TestContext::new();
    let domain = ctx.runtime.create(e2e_config()).await.expect("create failed");
    let kept = ctx
        .runtime
        .create(minimal_config("vm2", 32))
        .await
        .expect("create failed");

    domain.destroy().await.expect("destroy failed");

    assert!(ctx.runtime.get(domain.id().as_str()).is_none());
    assert!(ctx.runtime.get_by_name("vm1").is_none());
    assert!(ctx.runtime.get_by_dom(DomHandle(1)).is_none());
    let listed: Vec<_> = ctx.runtime.list().into_iter().map(|snapshot| snapshot.id).collect();
    assert_eq!(listed, vec![kept.id().clone()]);
    assert_eq!(ctx.runtime.manager().len(), 1);

    let err = ctx.runtime.destroy(domain.id().as_str()).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));
    assert_eq!(ctx.fakes.control.destroys(), vec![DomHandle(1)]);
}

#[tokio::test]
async fn concurrent_destroy_calls_hypervisor_once() {
    let ctx = TestContext::new();
    let domain = ctx.runtime.create(e2e_config()).await.expect("create failed");

    let (a, b) = tokio::join!(domain.destroy(), domain.destroy());
    a.expect("destroy failed");
    b.expect("destroy failed");
    assert_eq!(ctx.fakes.control.destroys().len(), 1);
}

#[tokio::test]
async fn destroy_failure_is_reported_once() {
    let ctx = TestContext::new();
    ctx.fakes.control.set_destroy_rc(-1);
    let domain = ctx.runtime.create(minimal_config("vm1", 32)).await.expect("create failed");

    let err = domain.destroy().await.unwrap_err();
    assert!(matches!(err, DomainError::Resource(_)));
    assert!(domain.is_terminated());
    domain.destroy().await.expect("second destroy should be a no-op");
    assert_eq!(ctx.fakes.control.destroys().len(), 1);
}

#[tokio::test]
async fn terminated_domain_rejects_device_changes() {
    let ctx = TestContext::new();
    let domain = ctx.runtime.create(e2e_config()).await.expect("create failed");
    domain.destroy().await.expect("destroy failed");

    let err = domain.create_device(Node::tag("vif")).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));
    let err = domain.destroy_device("vif", 0).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));
}
