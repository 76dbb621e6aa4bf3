//! Master/secondary replication over a shared accelerator pool.

use recon_arena::{MemoryError, ResourceDef};
use recon_core::{DeviceType, MemoryType, Plane};
use recon_engine::{
    BackendError, BackendRegistry, DeviceSettings, InitError, InitPhase, ProcessingConfig,
    Reconstruction,
};
use recon_test_utils::{accelerator_registry, failing_accelerator_registry, MockProcessor};

fn settings() -> ProcessingConfig {
    ProcessingConfig {
        alignment: 64,
        ..ProcessingConfig::default()
    }
}

fn gpu_master(registry: &BackendRegistry) -> Reconstruction {
    Reconstruction::new(registry, DeviceSettings::forced(DeviceType::Cuda), settings()).unwrap()
}

#[test]
fn mismatched_secondary_rejected_before_memory_is_touched() {
    let registry = accelerator_registry(DeviceType::Cuda);
    let mut master = gpu_master(&registry);
    let err = master
        .create_secondary(&registry, DeviceSettings::new(DeviceType::Cpu))
        .unwrap_err();
    assert_eq!(
        err,
        InitError::DeviceTypeMismatch {
            master: DeviceType::Cuda,
            secondary: DeviceType::Cpu,
        }
    );
    assert!(master.secondaries().is_empty());
    assert!(!master.memory().is_pool_installed());
    assert!(master.memory().registry().is_empty());
}

#[test]
fn unavailable_backend_falls_back_to_host() {
    let registry = BackendRegistry::with_defaults();
    let rec = Reconstruction::new(&registry, DeviceSettings::new(DeviceType::Cuda), settings())
        .unwrap();
    assert_eq!(rec.device_type(), DeviceType::Cpu);
    assert!(!rec.memory().has_device_plane());

    let err = Reconstruction::new(&registry, DeviceSettings::forced(DeviceType::Cuda), settings())
        .unwrap_err();
    assert_eq!(
        err,
        InitError::Backend(BackendError::NotCompiledIn {
            device: DeviceType::Cuda
        })
    );
}

#[test]
fn permanent_layers_and_shared_transients() {
    let registry = accelerator_registry(DeviceType::Cuda);
    let mut master = gpu_master(&registry);
    let geometry = MockProcessor::new("geometry")
        .with(ResourceDef::fixed(
            "geometry",
            MemoryType::INOUT | MemoryType::PERMANENT,
            1000,
        ))
        .with(ResourceDef::fixed("hits", MemoryType::INOUT, 512));
    let master_log = geometry.assignments();
    master.register_processor(Box::new(geometry)).unwrap();

    for _ in 0..2 {
        let index = master
            .create_secondary(&registry, DeviceSettings::new(DeviceType::Cuda))
            .unwrap();
        let local = MockProcessor::new("local")
            .with(ResourceDef::fixed(
                "calib",
                MemoryType::DEVICE | MemoryType::PERMANENT,
                200,
            ))
            .with(ResourceDef::fixed("work", MemoryType::DEVICE, 700));
        master
            .secondary_mut(index)
            .unwrap()
            .register_processor(Box::new(local))
            .unwrap();
    }

    master.init().unwrap();
    assert!(master.streams() >= 3);

    // Permanent: master 1024 (padded), then 256 per secondary in the
    // device plane. Transient: the largest unit, 704.
    let (host, device) = master.pool_sizes();
    assert_eq!(device, 1024 + 256 + 256 + 704);
    assert_eq!(host, 1024 + 512);
    let boundary = master.memory().permanent_boundaries();
    assert_eq!(boundary.device, Some(1000 + 24 + 200 + 56 + 200));
    // Secondary views start on an aligned base, so the host boundary
    // moves up to it even though no secondary has host data.
    assert_eq!(boundary.host, 1024);
    for s in master.secondaries() {
        assert!(s.is_initialized());
        assert_eq!(s.memory().permanent_boundaries().device, boundary.device);
        assert_eq!(s.pool_sizes(), (host, device));
    }
    let calib = master.secondaries()[1].memory().registry().ids()[0];
    let p = master.secondaries()[1]
        .memory()
        .placement(calib, Plane::Device)
        .unwrap()
        .unwrap();
    assert_eq!(p.address(), 1280);

    // Permanent resources were reported at init.
    assert_eq!(master_log.lock().unwrap()[0].device, Some(0));

    for index in 0..2 {
        let s = master.secondary_mut(index).unwrap();
        s.allocate_registered(None).unwrap();
        let work = s.memory().registry().ids()[1];
        let p = s.memory().placement(work, Plane::Device).unwrap().unwrap();
        assert_eq!(p.address(), 1536);
        assert!(p.end() <= device);
        s.clear_allocated(true);
    }
    master.allocate_registered(None).unwrap();
    let hits = master.memory().registry().ids()[1];
    let p = master.memory().placement(hits, Plane::Host).unwrap().unwrap();
    assert_eq!(p.address(), 1024);
    master.log_memory_statistics();
    master.exit().unwrap();
    assert!(master.secondaries().iter().all(|s| !s.is_initialized()));
}

#[test]
fn secondary_device_failure_aborts_init() {
    let registry = accelerator_registry(DeviceType::Cuda);
    let broken = failing_accelerator_registry(DeviceType::Cuda);
    let mut master = gpu_master(&registry);
    master
        .create_secondary(&broken, DeviceSettings::new(DeviceType::Cuda))
        .unwrap();
    let err = master.init().unwrap_err();
    match err {
        InitError::Secondary {
            index: 0,
            phase: InitPhase::Device,
            source,
        } => assert!(matches!(*source, InitError::Backend(BackendError::Unavailable { .. }))),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!master.is_initialized());
    assert!(!master.memory().is_pool_installed());
}

#[test]
fn master_out_of_memory_reports_shortfall() {
    let registry = accelerator_registry(DeviceType::Cuda);
    let mut master = Reconstruction::new(
        &registry,
        DeviceSettings::forced(DeviceType::Cuda),
        ProcessingConfig {
            device_pool_size: 2048,
            ..settings()
        },
    )
    .unwrap();
    master
        .register_processor(Box::new(MockProcessor::new("big").with(ResourceDef::fixed(
            "lut",
            MemoryType::DEVICE | MemoryType::PERMANENT,
            4000,
        ))))
        .unwrap();
    match master.init().unwrap_err() {
        InitError::Memory(e @ MemoryError::OutOfMemory { .. }) => {
            assert_eq!(e.shortfall(), Some(4000 - 2048));
            assert!(e.to_string().contains("lut"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
