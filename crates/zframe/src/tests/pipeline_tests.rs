use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geometry::RigidTransform;

use super::*;
use crate::config::{ZFrameKind, ZFrameTopology};
use crate::volume::{RegionOfInterest, VolumeError, VolumeHandle, VolumeWorkbench};

const TOPOLOGY: &str = "\
Side 1: 30.0 -30.0 -30.0 30.0 30.0 -30.0
Side 2: -30.0 -30.0 -30.0 -30.0 30.0 -30.0
Base: 30.0 -30.0 -30.0 -30.0 -30.0 -30.0
";

/// Index space equals RAS space; island counts per slice are scripted.
struct ScriptedWorkbench {
    depth: usize,
    counts: HashMap<usize, usize>,
    next_handle: u32,
    live: Vec<VolumeHandle>,
}

impl ScriptedWorkbench {
    fn new(depth: usize, counts: &[(usize, usize)]) -> Self {
        Self {
            depth,
            counts: counts.iter().copied().collect(),
            next_handle: 0,
            live: Vec::new(),
        }
    }

    fn allocate(&mut self) -> VolumeHandle {
        let handle = VolumeHandle(self.next_handle);
        self.next_handle += 1;
        self.live.push(handle);
        handle
    }
}

impl VolumeWorkbench for ScriptedWorkbench {
    fn dimensions(&self) -> [usize; 3] {
        [128, 128, self.depth]
    }

    fn ras_to_index(&self, point: [f64; 3]) -> [f64; 3] {
        point
    }

    fn crop(&mut self, _roi: &RegionOfInterest) -> Result<VolumeHandle, VolumeError> {
        Ok(self.allocate())
    }

    fn threshold_label(
        &mut self,
        _volume: VolumeHandle,
        _lower: f64,
        _upper: f64,
    ) -> Result<VolumeHandle, VolumeError> {
        Ok(self.allocate())
    }

    fn mask_source(
        &mut self,
        _volume: VolumeHandle,
        _label: VolumeHandle,
    ) -> Result<VolumeHandle, VolumeError> {
        Ok(self.allocate())
    }

    fn otsu(&mut self, _volume: VolumeHandle) -> Result<VolumeHandle, VolumeError> {
        Ok(self.allocate())
    }

    fn dilate(&mut self, _volume: VolumeHandle) -> Result<(), VolumeError> {
        Ok(())
    }

    fn component_count(&self, _volume: VolumeHandle, slice: usize) -> Result<usize, VolumeError> {
        if slice >= self.depth {
            return Err(VolumeError::SliceOutOfRange {
                slice,
                depth: self.depth,
            });
        }
        Ok(self.counts.get(&slice).copied().unwrap_or(0))
    }

    fn discard(&mut self, volume: VolumeHandle) {
        self.live.retain(|h| *h != volume);
    }
}

struct FakeRegistration {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    result: Result<RigidTransform, String>,
}

impl FakeRegistration {
    fn succeeding() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            result: Ok(RigidTransform::at_position([0.0, 0.0, 42.5])),
        }
    }
}

#[async_trait]
impl RegistrationService for FakeRegistration {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn register(
        &self,
        _request: RegistrationRequest,
    ) -> Result<RigidTransform, RegistrationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.result.clone().map_err(RegistrationFailure)
    }
}

fn request(roi: Option<RegionOfInterest>) -> CalibrationRequest {
    CalibrationRequest {
        kind: ZFrameKind::Z001,
        topology: ZFrameTopology::parse(TOPOLOGY).unwrap(),
        roi,
        manual_range: None,
        manual_fiducials: None,
    }
}

fn roi_over_slices(start: f64, end: f64) -> RegionOfInterest {
    RegionOfInterest {
        min_ras: [-40.0, -40.0, start],
        max_ras: [40.0, 40.0, end],
    }
}

#[tokio::test]
async fn automatic_range_expands_from_center_while_dense() {
    // Dense slices 18-24, ROI covers 10-30 so the center slice is 20.
    let counts: Vec<(usize, usize)> = (18..=24).map(|s| (s, 9)).collect();
    let mut workbench = ScriptedWorkbench::new(60, &counts);
    let service = FakeRegistration::succeeding();

    let result = calibrate(
        &mut workbench,
        &service,
        &request(Some(roi_over_slices(10.0, 30.0))),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(result.range, SliceRange { start: 18, end: 24 });
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    // All scratch volumes released after the solve.
    assert!(workbench.live.is_empty());
}

#[tokio::test]
async fn only_center_slice_dense_yields_single_slice_range() {
    let mut workbench = ScriptedWorkbench::new(60, &[(20, 8)]);
    let service = FakeRegistration::succeeding();

    let result = calibrate(
        &mut workbench,
        &service,
        &request(Some(roi_over_slices(10.0, 30.0))),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(result.range, SliceRange { start: 20, end: 20 });
}

#[tokio::test]
async fn expansion_stops_at_first_sparse_slice() {
    // Slice 22 is dense again beyond the gap at 21; it must not be reached.
    let mut workbench = ScriptedWorkbench::new(60, &[(19, 7), (20, 9), (22, 9)]);
    let service = FakeRegistration::succeeding();

    let result = calibrate(
        &mut workbench,
        &service,
        &request(Some(roi_over_slices(10.0, 30.0))),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(result.range, SliceRange { start: 19, end: 20 });
}

#[tokio::test]
async fn roi_bounds_clamp_to_volume_depth() {
    let counts: Vec<(usize, usize)> = (0..30).map(|s| (s, 9)).collect();
    let mut workbench = ScriptedWorkbench::new(30, &counts);
    let service = FakeRegistration::succeeding();

    let result = calibrate(
        &mut workbench,
        &service,
        &request(Some(roi_over_slices(-10.0, 500.0))),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(result.range, SliceRange { start: 0, end: 29 });
}

#[tokio::test]
async fn missing_roi_aborts_before_any_volume_work() {
    let mut workbench = ScriptedWorkbench::new(60, &[]);
    let service = FakeRegistration::succeeding();

    let err = calibrate(
        &mut workbench,
        &service,
        &request(None),
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CalibrationError::MissingRegionOfInterest));
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    assert_eq!(workbench.next_handle, 0);
}

#[tokio::test]
async fn wrong_fiducial_count_rejected_before_registration() {
    let mut workbench = ScriptedWorkbench::new(60, &[]);
    let service = FakeRegistration::succeeding();
    let mut req = request(Some(roi_over_slices(10.0, 30.0)));
    // z001 expects 7 points.
    req.manual_fiducials = Some(vec![[0.0, 0.0, 20.0]; 6]);

    let err = calibrate(&mut workbench, &service, &req, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CalibrationError::FiducialCount {
            kind: ZFrameKind::Z001,
            expected: 7,
            actual: 6,
        }
    ));
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn manual_fiducials_pin_the_slice_and_carry_pixel_coordinates() {
    let mut workbench = ScriptedWorkbench::new(60, &[]);
    let calls = Arc::new(AtomicUsize::new(0));
    struct Capturing {
        calls: Arc<AtomicUsize>,
    }
    #[async_trait]
    impl RegistrationService for Capturing {
        fn name(&self) -> &str {
            "capturing"
        }
        async fn register(
            &self,
            request: RegistrationRequest,
        ) -> Result<RigidTransform, RegistrationFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.range, SliceRange { start: 25, end: 26 });
            assert_eq!(request.fiducials.len(), 7);
            assert_eq!(request.fiducials[0], [12, -3]);
            Ok(RigidTransform::identity())
        }
    }
    let service = Capturing {
        calls: Arc::clone(&calls),
    };

    let mut req = request(Some(roi_over_slices(10.0, 30.0)));
    let mut fiducials = vec![[0.0, 0.0, 25.2]; 7];
    fiducials[0] = [12.4, -2.8, 25.2];
    req.manual_fiducials = Some(fiducials);

    calibrate(&mut workbench, &service, &req, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn registration_deadline_is_enforced() {
    let mut workbench = ScriptedWorkbench::new(60, &[(20, 9)]);
    let service = FakeRegistration {
        calls: Arc::new(AtomicUsize::new(0)),
        delay: Duration::from_secs(300),
        result: Ok(RigidTransform::identity()),
    };

    let err = calibrate(
        &mut workbench,
        &service,
        &request(Some(roi_over_slices(10.0, 30.0))),
        Duration::from_secs(120),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CalibrationError::Timeout(_)));
    // Scratch volumes are still released on the failure path.
    assert!(workbench.live.is_empty());
}

#[tokio::test]
async fn backend_failure_surfaces_its_message() {
    let mut workbench = ScriptedWorkbench::new(60, &[(20, 9)]);
    let service = FakeRegistration {
        calls: Arc::new(AtomicUsize::new(0)),
        delay: Duration::ZERO,
        result: Err("no fiducial pattern found".to_string()),
    };

    let err = calibrate(
        &mut workbench,
        &service,
        &request(Some(roi_over_slices(10.0, 30.0))),
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();

    match err {
        CalibrationError::Registration(message) => {
            assert_eq!(message, "no fiducial pattern found")
        }
        other => panic!("unexpected error {other:?}"),
    }
}
