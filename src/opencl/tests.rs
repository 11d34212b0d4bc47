use super::*;
use std::rc::Rc;

use crate::bench::{compare_readback, verify_levels};
use crate::controller::{Layout, PyramidController};
use crate::derivative::DerivativeKernels;
use crate::filter::{BorderMode, FilterKernel, Matrix, SeparableKernel};
use crate::host_image::HostImage;
use crate::method::Method;
use crate::pyramid::{LookupEntry, NUMBER_LEVELS};
use crate::reference;

const LEVEL_TOLERANCE: f32 = 1e-5;
const DERIVATIVE_TOLERANCE: f32 = 1e-3;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn backend() -> Option<Rc<ClBackend>> {
    init_logging();
    match ClBackend::new() {
        Ok(b) => Some(Rc::new(b)),
        Err(PyrError::Unsupported) => None,
        Err(e) => panic!("Unexpected error: {:?}", e),
    }
}

fn controller(layout: Layout, backend: Rc<ClBackend>) -> Box<dyn PyramidController> {
    match layout {
        Layout::Images => Box::new(ImagesController::new(backend)),
        Layout::Cubes => Box::new(CubesController::new(backend)),
        Layout::Buffer => Box::new(FlatController::new(backend)),
    }
}

#[test]
fn test_lookup_entry_size() {
    // LookupEntry must be 12 bytes to match struct Lookup in common.cl
    assert_eq!(std::mem::size_of::<LookupEntry>(), 12);
}

#[test]
fn test_work_shapes() {
    let s = WorkShape::d2(640, 480);
    assert_eq!(s.dims, 2);
    assert_eq!(s.global, [640, 480, 1]);
    assert_eq!(s.offset, [0, 0, 0]);

    let s = WorkShape::d3(80, 60, 4, 12);
    assert_eq!(s.dims, 3);
    assert_eq!((s.cols(), s.rows()), (80, 60));
    assert_eq!(s.offset, [0, 0, 12]);
    assert_eq!(s.tile(), [16, 16, 1]);
}

#[test]
fn test_program_sources() {
    for layout in Layout::ALL {
        let src = program::program_source(layout).unwrap();
        assert!(src.contains(&format!("// {}", layout.kernel_file())));
        assert!(src.contains("kernel void fed_resize"));
        assert!(src.contains("constant float Gx_9x9"));
        assert!(src.contains("FOR_EACH_SQUARE(DEFINE_FILTER_SINGLE)"));
        assert_eq!(
            src.contains("filter_single_local_onePass"),
            layout == Layout::Images
        );
        assert_eq!(
            src.contains("kernel void copy_inside_cube"),
            layout != Layout::Images
        );
    }
}

#[test]
fn test_build_options() {
    assert_eq!(program::build_options(false), "-cl-std=CL2.0");
    let debug = program::build_options(true);
    assert!(debug.starts_with("-cl-std=CL2.0"));
    assert!(debug.contains("-Werror"));
    assert!(debug.contains("-g"));
}

#[test]
fn test_probe_devices_does_not_panic() {
    let devices = probe_devices();
    for d in &devices {
        assert!(!d.name.is_empty());
    }
}

#[test]
fn test_device_count_does_not_panic() {
    let _ = device_count();
}

#[test]
fn test_backend_creation() {
    let Some(backend) = backend() else { return };
    assert!(!backend.device_name().is_empty());
    assert!(backend.max_work_group_size() >= 1);
    assert!(format!("{backend:?}").contains("ClBackend"));
}

#[test]
fn test_every_layout_compiles() {
    let Some(backend) = backend() else { return };
    for layout in Layout::ALL {
        let program = backend.compile_program(layout, false).unwrap();
        assert_eq!(program.layout(), layout);
        for name in ["filter_single", "filter_double_local_3x3", "filter_single_Gy_7x7", "fed_resize"] {
            program.kernel(name).unwrap();
        }
        assert!(program.kernel("filter_triple").is_err());
    }
}

#[test]
fn test_pyramid_levels_match_reference() {
    let Some(backend) = backend() else { return };
    let source = HostImage::synthetic(64, 32);
    for layout in Layout::ALL {
        let mut c = controller(layout, Rc::clone(&backend));
        c.init(&source).unwrap();
        let levels = c.read_levels().unwrap();
        assert_eq!(levels.len(), NUMBER_LEVELS);
        assert_eq!((levels[15].width(), levels[15].height()), (8, 4));
        let err = verify_levels(&levels, &source).unwrap();
        assert!(err < LEVEL_TOLERANCE, "{layout}: level error {err}");
    }
}

#[test]
fn test_all_methods_match_reference() {
    let Some(backend) = backend() else { return };
    let source = HostImage::synthetic(64, 32);
    for layout in Layout::ALL {
        let mut c = controller(layout, Rc::clone(&backend));
        c.init(&source).unwrap();
        for method in Method::ALL {
            assert!(c.supports(method));
            for sigma_size in [1, 2] {
                c.set_configuration(method, sigma_size).unwrap();
                c.run_method().unwrap();
                let readback = c.read_images().unwrap();
                let (ex, ey) =
                    compare_readback(&readback, sigma_size, BorderMode::Reflect101).unwrap();
                assert!(
                    ex < DERIVATIVE_TOLERANCE && ey < DERIVATIVE_TOLERANCE,
                    "{layout} {method} sigma {sigma_size}: gx {ex} gy {ey}"
                );
            }
        }
    }
}

#[test]
fn test_replicate_border() {
    let Some(backend) = backend() else { return };
    let source = HostImage::synthetic(32, 32);
    let mut c = FlatController::with_options(backend, BorderMode::Replicate, false);
    c.init(&source).unwrap();
    c.set_configuration(Method::DoubleLocal, 3).unwrap();
    c.run_method().unwrap();
    let readback = c.read_images().unwrap();
    let (ex, ey) = compare_readback(&readback, 3, BorderMode::Replicate).unwrap();
    assert!(ex < DERIVATIVE_TOLERANCE && ey < DERIVATIVE_TOLERANCE);
}

#[test]
fn test_state_machine_enforced() {
    let Some(backend) = backend() else { return };
    let source = HostImage::synthetic(32, 16);
    let mut c = CubesController::new(backend);
    assert!(matches!(c.run_method(), Err(PyrError::Contract(_))));
    assert!(matches!(c.read_levels(), Err(PyrError::Contract(_))));
    c.init(&source).unwrap();
    assert!(matches!(c.init(&source), Err(PyrError::Contract(_))));
    assert!(matches!(c.read_images(), Err(PyrError::Contract(_))));
    c.set_configuration(Method::Single, 1).unwrap();
    c.run_method().unwrap();
    c.read_images().unwrap();
    // Reconfiguring keeps the pyramid.
    c.set_configuration(Method::Double, 2).unwrap();
    c.run_method().unwrap();
}

#[test]
fn test_odd_source_rejected() {
    let Some(backend) = backend() else { return };
    let mut c = ImagesController::new(backend);
    let err = c.init(&HostImage::synthetic(66, 32)).unwrap_err();
    assert!(matches!(err, PyrError::Contract(_)));
    assert_eq!(c.state(), crate::controller::ControllerState::Uninitialized);
}

#[test]
fn test_one_pass_matches_separation() {
    let Some(backend) = backend() else { return };
    let source = HostImage::synthetic(64, 64);
    let mut c = ImagesController::new(backend);
    c.init(&source).unwrap();
    for sigma_size in [1, 3] {
        c.set_configuration(Method::SingleSeparation, sigma_size).unwrap();
        c.run_method().unwrap();
        let separated = c.read_images().unwrap().gx;
        c.run_one_pass().unwrap();
        let fused = c.read_images().unwrap().gx;
        for (a, b) in separated.iter().zip(&fused) {
            assert!(a.max_abs_diff(b).unwrap() < DERIVATIVE_TOLERANCE);
        }
    }
}

/// Engine over two 2D images of one size with a fresh images program.
fn image_engine(
    backend: &Rc<ClBackend>,
    width: usize,
    height: usize,
) -> (FilterEngine, Image, Image, Image) {
    let program = Rc::new(backend.compile_program(Layout::Images, false).unwrap());
    let engine = FilterEngine::new(Rc::clone(backend), program);
    let src = backend.alloc_image2d(width, height).unwrap();
    let dst = backend.alloc_image2d(width, height).unwrap();
    let small = backend.alloc_image2d(width / 2, height / 2).unwrap();
    (engine, src, dst, small)
}

#[test]
fn test_engine_contracts() {
    let Some(backend) = backend() else { return };
    let (mut engine, src_img, dst_img, small_img) = image_engine(&backend, 32, 32);
    let src = ImageSurface::new(&src_img, 32, 32).unwrap();
    let dst = ImageSurface::new(&dst_img, 32, 32).unwrap();
    let small = ImageSurface::new(&small_img, 16, 16).unwrap();

    // Nothing bound yet.
    assert!(matches!(engine.run_single(&src, &dst), Err(PyrError::Contract(_))));

    let k = FilterKernel::new(&Matrix::from_f32(3, 3, vec![1.0; 9]).unwrap()).unwrap();
    engine.set_kernel1(&k).unwrap();
    assert!(matches!(engine.run_single(&src, &small), Err(PyrError::Contract(_))));

    let big = FilterKernel::new(&Matrix::from_f32(19, 19, vec![0.0; 361]).unwrap()).unwrap();
    engine.set_kernel1(&big).unwrap();
    assert!(matches!(engine.run_single_local(&src, &dst), Err(PyrError::Contract(_))));

    let wide = FilterKernel::new(&Matrix::from_f32(3, 5, vec![0.0; 15]).unwrap()).unwrap();
    engine.set_kernel2(&wide).unwrap();
    assert!(matches!(engine.run_double(&src, &dst, &dst), Err(PyrError::Contract(_))));

    assert!(matches!(
        engine.run_single_predefined(&src, &dst, "Gx", 11),
        Err(PyrError::Contract(_))
    ));
    assert!(matches!(
        engine.run_single_predefined(&src, &dst, "Gz", 3),
        Err(PyrError::Contract(_))
    ));
}

#[test]
fn test_engine_consumes_dependencies() {
    let Some(backend) = backend() else { return };
    let (mut engine, mut src_img, dst_img, _) = image_engine(&backend, 32, 32);
    let host = HostImage::synthetic(32, 32);
    let upload = backend
        .write_image(QueueId::Primary, &mut src_img, 0, 32, 32, host.as_slice())
        .unwrap();
    let k = FilterKernel::new(&Matrix::from_f32(3, 3, vec![1.0 / 9.0; 9]).unwrap()).unwrap();
    engine.set_kernel1(&k).unwrap();
    engine.add_dependency(upload);
    assert_eq!(engine.pending_dependencies(), 1);

    let src = ImageSurface::new(&src_img, 32, 32).unwrap();
    let dst = ImageSurface::new(&dst_img, 32, 32).unwrap();
    engine.run_single(&src, &dst).unwrap();
    assert_eq!(engine.pending_dependencies(), 0);
    backend.finish(QueueId::Primary).unwrap();
}

#[test]
fn test_generic_kernels_match_reference() {
    let Some(backend) = backend() else { return };
    let host = HostImage::synthetic(48, 32);
    let (mut engine, mut src_img, dst_img, _) = image_engine(&backend, 48, 32);
    backend
        .write_image(QueueId::Primary, &mut src_img, 0, 48, 32, host.as_slice())
        .unwrap();
    let src = ImageSurface::new(&src_img, 48, 32).unwrap();
    let dst = ImageSurface::new(&dst_img, 48, 32).unwrap();

    // 11x11 has no unrolled entry point; 3x5 is not square.
    for (rows, cols) in [(11, 11), (3, 5)] {
        let coeffs: Vec<f32> = (0..rows * cols).map(|i| (i % 7) as f32 * 0.01).collect();
        let k = FilterKernel::new(&Matrix::from_f32(rows, cols, coeffs).unwrap()).unwrap();
        engine.set_kernel1(&k).unwrap();
        let expected = reference::correlate(&host, &k, BorderMode::Reflect101);
        for tiled in [false, true] {
            if tiled {
                engine.run_single_local(&src, &dst).unwrap();
            } else {
                engine.run_single(&src, &dst).unwrap();
            }
            let got = backend.read_image(QueueId::Primary, &dst_img, 0, 48, 32).unwrap();
            let got = HostImage::from_vec(48, 32, got).unwrap();
            let err = got.max_abs_diff(&expected).unwrap();
            assert!(err < DERIVATIVE_TOLERANCE, "{rows}x{cols} tiled={tiled}: {err}");
        }
    }
}

#[test]
fn test_unequal_separable_pair() {
    let Some(backend) = backend() else { return };
    let host = HostImage::synthetic(32, 32);
    let (mut engine, mut src_img, dst_img, _) = image_engine(&backend, 32, 32);
    backend
        .write_image(QueueId::Primary, &mut src_img, 0, 32, 32, host.as_slice())
        .unwrap();
    let pair = SeparableKernel::new(
        &Matrix::column(vec![1.0, 2.0, 1.0]),
        &Matrix::row(vec![-1.0, -2.0, 0.0, 2.0, 1.0]),
    )
    .unwrap();
    engine.set_separation1(&pair).unwrap();
    let src = ImageSurface::new(&src_img, 32, 32).unwrap();
    let dst = ImageSurface::new(&dst_img, 32, 32).unwrap();
    let expected = reference::correlate(&host, &pair.to_complete(), BorderMode::Reflect101);

    engine.run_single_separation(&src, &dst).unwrap();
    let got = backend.read_image(QueueId::Primary, &dst_img, 0, 32, 32).unwrap();
    let err = HostImage::from_vec(32, 32, got).unwrap().max_abs_diff(&expected).unwrap();
    assert!(err < DERIVATIVE_TOLERANCE, "separation: {err}");
    assert_eq!(engine.scratch().len(), 1);

    engine.run_single_local_one_pass(&src, &dst).unwrap();
    let got = backend.read_image(QueueId::Primary, &dst_img, 0, 32, 32).unwrap();
    let err = HostImage::from_vec(32, 32, got).unwrap().max_abs_diff(&expected).unwrap();
    assert!(err < DERIVATIVE_TOLERANCE, "one pass: {err}");
}

#[test]
fn test_secondary_queue() {
    let Some(backend) = backend() else { return };
    let host = HostImage::synthetic(32, 32);
    let (mut engine, mut src_img, dst_img, _) = image_engine(&backend, 32, 32);
    let upload = backend
        .write_image(QueueId::Primary, &mut src_img, 0, 32, 32, host.as_slice())
        .unwrap();
    let k = FilterKernel::new(&Matrix::from_f32(5, 5, vec![0.04; 25]).unwrap()).unwrap();
    engine.set_queue(QueueId::Secondary);
    engine.set_kernel1(&k).unwrap();
    engine.add_dependency(upload);
    let src = ImageSurface::new(&src_img, 32, 32).unwrap();
    let dst = ImageSurface::new(&dst_img, 32, 32).unwrap();
    let event = engine.run_single(&src, &dst).unwrap();
    event.wait().unwrap();
    let got = backend.read_image(QueueId::Primary, &dst_img, 0, 32, 32).unwrap();
    let expected = reference::correlate(&host, &k, BorderMode::Reflect101);
    let err = HostImage::from_vec(32, 32, got).unwrap().max_abs_diff(&expected).unwrap();
    assert!(err < DERIVATIVE_TOLERANCE);
}

#[test]
fn test_rejected_launch_keeps_dependencies() {
    let Some(backend) = backend() else { return };
    let (mut engine, mut src_img, dst_img, small_img) = image_engine(&backend, 32, 32);
    let host = HostImage::synthetic(32, 32);
    let upload = backend
        .write_image(QueueId::Primary, &mut src_img, 0, 32, 32, host.as_slice())
        .unwrap();
    let k = FilterKernel::new(&Matrix::from_f32(3, 3, vec![1.0 / 9.0; 9]).unwrap()).unwrap();
    engine.set_kernel1(&k).unwrap();
    engine.set_queue(QueueId::Secondary);
    engine.add_dependency(upload);

    let src = ImageSurface::new(&src_img, 32, 32).unwrap();
    let dst = ImageSurface::new(&dst_img, 32, 32).unwrap();
    let small = ImageSurface::new(&small_img, 16, 16).unwrap();
    assert!(engine.run_single(&src, &small).is_err());
    assert!(engine.run_single_separation(&src, &dst).is_err());
    assert!(engine.run_single_predefined(&src, &dst, "Gx", 4).is_err());
    assert_eq!(engine.pending_dependencies(), 1);

    // The corrected launch still orders after the upload.
    engine.run_single(&src, &dst).unwrap().wait().unwrap();
    assert_eq!(engine.pending_dependencies(), 0);
    let got = backend.read_image(QueueId::Primary, &dst_img, 0, 32, 32).unwrap();
    let expected = reference::correlate(&host, &k, BorderMode::Reflect101);
    let err = HostImage::from_vec(32, 32, got).unwrap().max_abs_diff(&expected).unwrap();
    assert!(err < DERIVATIVE_TOLERANCE);
}

#[test]
fn test_rebinding_same_kernel_is_idempotent() {
    let Some(backend) = backend() else { return };
    let host = HostImage::synthetic(32, 32);
    let (mut engine, mut src_img, dst_img, _) = image_engine(&backend, 32, 32);
    backend
        .write_image(QueueId::Primary, &mut src_img, 0, 32, 32, host.as_slice())
        .unwrap();
    let src = ImageSurface::new(&src_img, 32, 32).unwrap();
    let dst = ImageSurface::new(&dst_img, 32, 32).unwrap();
    let k = DerivativeKernels::for_sigma_size(2).unwrap().gx;

    engine.set_kernel1(&k).unwrap();
    engine.run_single(&src, &dst).unwrap();
    let once = backend.read_image(QueueId::Primary, &dst_img, 0, 32, 32).unwrap();

    engine.set_kernel1(&k).unwrap();
    engine.set_kernel1(&k).unwrap();
    engine.run_single(&src, &dst).unwrap();
    let twice = backend.read_image(QueueId::Primary, &dst_img, 0, 32, 32).unwrap();
    assert_eq!(once, twice);
    assert_eq!(engine.pending_dependencies(), 0);
}

#[test]
fn test_scharr_on_constant_image_is_zero() {
    let Some(backend) = backend() else { return };
    let (w, h) = (40, 24);
    let host = HostImage::from_vec(w, h, vec![0.7; w * h]).unwrap();
    let (mut engine, mut src_img, gx_img, _) = image_engine(&backend, w, h);
    let gy_img = backend.alloc_image2d(w, h).unwrap();
    backend
        .write_image(QueueId::Primary, &mut src_img, 0, w, h, host.as_slice())
        .unwrap();
    let scharr = DerivativeKernels::for_sigma_size(1).unwrap();
    engine.set_kernel1(&scharr.gx).unwrap();
    engine.set_kernel2(&scharr.gy).unwrap();

    let src = ImageSurface::new(&src_img, w, h).unwrap();
    let gx = ImageSurface::new(&gx_img, w, h).unwrap();
    let gy = ImageSurface::new(&gy_img, w, h).unwrap();
    engine.run_double(&src, &gx, &gy).unwrap();
    for img in [&gx_img, &gy_img] {
        let got = backend.read_image(QueueId::Primary, img, 0, w, h).unwrap();
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                assert!(got[y * w + x].abs() < 1e-5, "({x}, {y}) = {}", got[y * w + x]);
            }
        }
    }
}

#[test]
fn test_double_separation_event_covers_both_outputs() {
    let Some(backend) = backend() else { return };
    let host = HostImage::synthetic(32, 32);
    let (mut engine, mut src_img, gx_img, _) = image_engine(&backend, 32, 32);
    let gy_img = backend.alloc_image2d(32, 32).unwrap();
    let upload = backend
        .write_image(QueueId::Primary, &mut src_img, 0, 32, 32, host.as_slice())
        .unwrap();
    let k = DerivativeKernels::for_sigma_size(2).unwrap();
    engine.set_queue(QueueId::Secondary);
    engine.set_separation1(&k.gx_separable).unwrap();
    engine.set_separation2(&k.gy_separable).unwrap();
    engine.add_dependency(upload);

    let src = ImageSurface::new(&src_img, 32, 32).unwrap();
    let gx = ImageSurface::new(&gx_img, 32, 32).unwrap();
    let gy = ImageSurface::new(&gy_img, 32, 32).unwrap();
    engine.run_double_separation(&src, &gx, &gy).unwrap().wait().unwrap();
    assert_eq!(engine.scratch().len(), 2);

    for (img, kernel) in [(&gx_img, &k.gx), (&gy_img, &k.gy)] {
        let got = backend.read_image(QueueId::Primary, img, 0, 32, 32).unwrap();
        let expected = reference::correlate(&host, kernel, BorderMode::Reflect101);
        let err = HostImage::from_vec(32, 32, got).unwrap().max_abs_diff(&expected).unwrap();
        assert!(err < DERIVATIVE_TOLERANCE, "{err}");
    }
}

#[test]
fn test_one_pass_leaves_results_ready() {
    let Some(backend) = backend() else { return };
    let source = HostImage::synthetic(32, 32);
    let mut c = ImagesController::new(Rc::clone(&backend));
    c.init(&source).unwrap();
    c.set_configuration(Method::SingleSeparationLocal, 1).unwrap();
    c.run_one_pass().unwrap();
    assert_eq!(c.state(), crate::controller::ControllerState::ResultsReady);
    assert_eq!(c.read_images().unwrap().gx.len(), NUMBER_LEVELS);

    // No separable pair is bound for a complete-kernel method.
    let mut single = ImagesController::new(backend);
    single.init(&source).unwrap();
    single.set_configuration(Method::Single, 1).unwrap();
    assert!(matches!(single.run_one_pass(), Err(PyrError::Contract(_))));
    assert_eq!(single.state(), crate::controller::ControllerState::ConfigurationSet);
    single.run_method().unwrap();
}
