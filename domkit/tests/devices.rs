//! Integration tests for device handlers and runtime device add/remove.

use domkit::hypervisor::DeviceRequest;
use domkit::{ConfigError, DomHandle, DomainError, DomainRuntime, Node};
use domkit_test_utils::{PciCall, TestPlatform, device, e2e_config, minimal_config, pci, vbd};

// ============================================================================
// TEST FIXTURES
// ============================================================================

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
}

// ============================================================================
// RUNTIME ADD / REMOVE
// ============================================================================

#[tokio::test]
async fn create_and_destroy_device_at_runtime() {
    let ctx = TestContext::new();
    let domain = ctx.runtime.create(e2e_config()).await.expect("create failed");

    let handle = domain
        .create_device(Node::list("vif", [Node::field("mac", "aa:00:00:00:00:42")]))
        .await
        .expect("create_device failed")
        .expect("vif should produce a handle");
    assert_eq!(handle.id().as_deref(), Some("vif1.1"));
    assert_eq!(handle.sxpr().child_str("mac"), Some("aa:00:00:00:00:42"));

    let vifs = domain.get_devices("vif");
    assert_eq!(vifs.len(), 2);
    assert_eq!(vifs[1].index(), 1);
    assert_eq!(domain.config_devices("vif").len(), 2);
    assert!(
        domain
            .config_device("vif", 1)
            .is_some_and(|dev| dev.child_str("mac") == Some("aa:00:00:00:00:42"))
    );

    domain.destroy_device("vif", 1).await.expect("destroy_device failed");
    assert_eq!(domain.get_devices("vif").len(), 1);
    assert_eq!(domain.config_devices("vif").len(), 1);
    let removed = ctx.fakes.netif.device(DomHandle(1), 1).expect("vif missing");
    assert!(removed.is_destroyed());

    // The first vif is untouched.
    let kept = ctx.fakes.netif.device(DomHandle(1), 0).expect("vif missing");
    assert!(!kept.is_destroyed());
}

#[tokio::test]
async fn destroy_device_shifts_later_indices() {
    let ctx = TestContext::new();
    let config = minimal_config("vm1", 64)
        .with(device(Node::tag("vif")))
        .with(device(Node::tag("vif")))
        .with(device(Node::tag("vif")));
    let domain = ctx.runtime.create(config).await.expect("create failed");

    domain.destroy_device("vif", 0).await.expect("destroy_device failed");
    let ids: Vec<_> = domain
        .get_devices("vif")
        .iter()
        .map(|dev| (dev.index(), dev.handle().id()))
        .collect();
    assert_eq!(
        ids,
        vec![
            (0, Some("vif1.1".to_string())),
            (1, Some("vif1.2".to_string()))
        ]
    );
}

#[tokio::test]
async fn failed_runtime_device_leaves_config_unchanged() {
    let ctx = TestContext::new();
    let domain = ctx.runtime.create(e2e_config()).await.expect("create failed");
    ctx.fakes.netif.fail_create_at(1);

    let err = domain.create_device(Node::tag("vif")).await.unwrap_err();
    assert!(matches!(err, DomainError::Resource(_)));
    assert_eq!(domain.get_devices("vif").len(), 1);
    assert_eq!(domain.config_devices("vif").len(), 1);
    assert!(!domain.is_terminated());
}

#[tokio::test]
async fn unknown_runtime_device_type() {
    let ctx = TestContext::new();
    let domain = ctx.runtime.create(e2e_config()).await.expect("create failed");
    let before = domain.config();

    let err = domain.create_device(Node::tag("usb")).await.unwrap_err();
    assert!(matches!(
        err,
        DomainError::Config(ConfigError::UnknownDeviceType(ref kind)) if kind == "usb"
    ));
    assert_eq!(domain.config(), before);
}

#[tokio::test]
async fn destroy_missing_device() {
    let ctx = TestContext::new();
    let domain = ctx.runtime.create(e2e_config()).await.expect("create failed");

    let err = domain.destroy_device("vbd", 3).await.unwrap_err();
    assert!(matches!(err, DomainError::Config(ConfigError::InvalidDevice(_))));
}

// ============================================================================
// PCI
// ============================================================================

#[tokio::test]
async fn pci_accepts_decimal_and_hex() {
    let ctx = TestContext::new();
    let config = minimal_config("vm1", 64)
        .with(device(pci("0", "26", "0")))
        .with(device(pci("0x0", "0x1A", "0X0")));

    let domain = ctx.runtime.create(config).await.expect("create failed");
    let expected = PciCall {
        dom: DomHandle(1),
        bus: 0,
        dev: 26,
        func: 0,
        enable: true,
    };
    assert_eq!(ctx.fakes.control.pci_calls(), vec![expected.clone(), expected]);
    assert!(domain.get_devices("pci").is_empty());
}

#[tokio::test]
async fn pci_failure_fails_construction() {
    let ctx = TestContext::new();
    ctx.fakes.control.set_pci_rc(-1);
    let config = minimal_config("vm1", 64).with(device(pci("1", "2", "3")));

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(err.to_string().contains("Failed to configure device"));
    assert_eq!(ctx.fakes.control.destroys(), vec![DomHandle(1)]);
}

#[tokio::test]
async fn pci_with_invalid_component() {
    let ctx = TestContext::new();
    let config = minimal_config("vm1", 64).with(device(pci("1", "zz", "3")));

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(err.to_string().contains("invalid parameter"));
    assert!(ctx.fakes.control.pci_calls().is_empty());
}

// ============================================================================
// VBD
// ============================================================================

#[tokio::test]
async fn multi_segment_vbd_makes_no_backend_call() {
    let ctx = TestContext::new();
    let config = minimal_config("vm1", 64).with(device(vbd("phy:sdc", "hda1")));

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(err.is_segment());
    assert!(ctx.fakes.blkif.requests().is_empty());
}

#[tokio::test]
async fn vbd_mode_is_passed_through() {
    let ctx = TestContext::new();
    let config = minimal_config("vm1", 64).with(device(
        vbd("phy:sda1", "hdb").with(Node::field("mode", "w")),
    ));

    ctx.runtime.create(config).await.expect("create failed");
    let requests = ctx.fakes.blkif.requests();
    assert_eq!(requests.len(), 1);
    assert!(matches!(
        &requests[0].2,
        DeviceRequest::Block { vdev: 0x340, mode, .. } if mode == "w"
    ));
}

#[tokio::test]
async fn vbd_with_unknown_guest_device() {
    let ctx = TestContext::new();
    let config = minimal_config("vm1", 64).with(device(vbd("phy:sda1", "hdz")));

    ctx.runtime.create(config).await.unwrap_err();
    assert!(ctx.fakes.blkif.requests().is_empty());
}

#[tokio::test]
async fn vbd_rejected_in_block_backend_domain() {
    let ctx = TestContext::new();
    let config = minimal_config("blkbe", 64)
        .with(Node::list("backend", [Node::tag("blkif")]))
        .with(device(vbd("phy:sda1", "hda1")));

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(err.to_string().contains("vbd in blkif backend domain"));
    assert_eq!(ctx.fakes.blkif.control_domains(), vec![DomHandle(1)]);
}

// ============================================================================
// VIF
// ============================================================================

#[tokio::test]
async fn vif_rejected_in_network_backend_domain() {
    let ctx = TestContext::new();
    let config = minimal_config("netbe", 64)
        .with(Node::list("backend", [Node::tag("netif")]))
        .with(device(Node::tag("vif")));

    let err = ctx.runtime.create(config).await.unwrap_err();
    assert!(err.to_string().contains("vif in netif backend domain"));
    assert!(ctx.fakes.netif.requests().is_empty());
}
