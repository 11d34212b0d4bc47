//! Benchmark driver: methods × sigma sizes × iterations over one
//! initialised controller.
//!
//! A failing configuration is logged and recorded; the batch moves on
//! to the next one.

use std::fmt::Write as _;

use serde::Serialize;

use crate::config::{BenchConfig, ReportFormat};
use crate::controller::{Layout, PyramidController, PyramidReadback};
use crate::derivative::DerivativeKernels;
use crate::filter::BorderMode;
use crate::host_image::HostImage;
use crate::method::Method;
use crate::reference;
use crate::PyrResult;

/// Timings of one method at one sigma size.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub method: Method,
    pub sigma_size: usize,
    pub times_ms: Vec<f64>,
}

impl Sample {
    pub fn min(&self) -> f64 {
        self.times_ms.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.times_ms.iter().copied().fold(0.0, f64::max)
    }

    pub fn mean(&self) -> f64 {
        if self.times_ms.is_empty() {
            return 0.0;
        }
        self.times_ms.iter().sum::<f64>() / self.times_ms.len() as f64
    }
}

/// A configuration that produced no timing.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub method: Method,
    pub sigma_size: usize,
    pub error: String,
}

/// Largest deviation of device derivatives from the CPU reference.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub method: Method,
    pub sigma_size: usize,
    pub max_error_gx: f32,
    pub max_error_gy: f32,
}

/// Everything a batch produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub layout: Layout,
    pub width: usize,
    pub height: usize,
    pub samples: Vec<Sample>,
    pub failures: Vec<Failure>,
    pub verifications: Vec<Verification>,
}

/// Run every configured method and sigma size on `controller`, which
/// must already be initialised.
pub fn run_batch(
    controller: &mut dyn PyramidController,
    config: &BenchConfig,
    width: usize,
    height: usize,
) -> BatchReport {
    let mut report = BatchReport {
        layout: controller.layout(),
        width,
        height,
        samples: Vec::new(),
        failures: Vec::new(),
        verifications: Vec::new(),
    };

    for &method in &config.methods {
        for &sigma_size in &config.sigma_sizes {
            match run_configuration(controller, method, sigma_size, config.iterations) {
                Ok(times_ms) => {
                    let sample = Sample {
                        method,
                        sigma_size,
                        times_ms,
                    };
                    log::info!(
                        "{} {method} sigma {sigma_size}: mean {:.3} ms (min {:.3}, max {:.3})",
                        report.layout,
                        sample.mean(),
                        sample.min(),
                        sample.max()
                    );
                    report.samples.push(sample);
                    if config.verify {
                        match verify_derivatives(controller, sigma_size, config.border) {
                            Ok((gx, gy)) => report.verifications.push(Verification {
                                method,
                                sigma_size,
                                max_error_gx: gx,
                                max_error_gy: gy,
                            }),
                            Err(e) => log::error!("{method} sigma {sigma_size}: verification failed: {e}"),
                        }
                    }
                }
                Err(e) => {
                    log::error!("{} {method} sigma {sigma_size}: {e}", report.layout);
                    report.failures.push(Failure {
                        method,
                        sigma_size,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
    report
}

fn run_configuration(
    controller: &mut dyn PyramidController,
    method: Method,
    sigma_size: usize,
    iterations: usize,
) -> PyrResult<Vec<f64>> {
    controller.set_configuration(method, sigma_size)?;
    let mut times = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let elapsed = controller.run_method()?;
        times.push(elapsed.as_secs_f64() * 1000.0);
    }
    Ok(times)
}

/// Compare the controller's last derivative outputs with the CPU
/// reference applied to the device levels. Returns `(max |Δgx|, max |Δgy|)`.
pub fn verify_derivatives(
    controller: &mut dyn PyramidController,
    sigma_size: usize,
    border: BorderMode,
) -> PyrResult<(f32, f32)> {
    let readback = controller.read_images()?;
    compare_readback(&readback, sigma_size, border)
}

/// Reference check of one read-back, level by level.
pub fn compare_readback(
    readback: &PyramidReadback,
    sigma_size: usize,
    border: BorderMode,
) -> PyrResult<(f32, f32)> {
    let kernels = DerivativeKernels::for_sigma_size(sigma_size)?;
    let mut worst = (0.0f32, 0.0f32);
    for (i, level) in readback.levels.iter().enumerate() {
        let gx = reference::correlate(level, &kernels.gx, border);
        let gy = reference::correlate(level, &kernels.gy, border);
        worst.0 = worst.0.max(gx.max_abs_diff(&readback.gx[i])?);
        worst.1 = worst.1.max(gy.max_abs_diff(&readback.gy[i])?);
    }
    Ok(worst)
}

/// Largest deviation of device levels from the CPU reference pyramid.
pub fn verify_levels(levels: &[HostImage], source: &HostImage) -> PyrResult<f32> {
    let expected = reference::build_pyramid(source)?;
    crate::contract!(
        levels.len() == expected.len(),
        "expected {} levels, got {}",
        expected.len(),
        levels.len()
    );
    let mut worst = 0.0f32;
    for (got, want) in levels.iter().zip(&expected) {
        worst = worst.max(got.max_abs_diff(want)?);
    }
    Ok(worst)
}

/// Render `report` in `format`.
pub fn format_report(report: &BatchReport, format: ReportFormat) -> PyrResult<String> {
    let mut out = String::new();
    match format {
        ReportFormat::Table => {
            let _ = writeln!(
                out,
                "layout {} ({}x{})",
                report.layout, report.width, report.height
            );
            let _ = writeln!(
                out,
                "{:<24} {:>5} {:>10} {:>10} {:>10}",
                "method", "sigma", "min ms", "mean ms", "max ms"
            );
            let _ = writeln!(out, "{}", "-".repeat(63));
            for s in &report.samples {
                let _ = writeln!(
                    out,
                    "{:<24} {:>5} {:>10.3} {:>10.3} {:>10.3}",
                    s.method.name(),
                    s.sigma_size,
                    s.min(),
                    s.mean(),
                    s.max()
                );
            }
            for f in &report.failures {
                let _ = writeln!(
                    out,
                    "{:<24} {:>5} failed: {}",
                    f.method.name(),
                    f.sigma_size,
                    f.error
                );
            }
            for v in &report.verifications {
                let _ = writeln!(
                    out,
                    "{:<24} {:>5} max error gx {:.2e} gy {:.2e}",
                    v.method.name(),
                    v.sigma_size,
                    v.max_error_gx,
                    v.max_error_gy
                );
            }
        }
        ReportFormat::Mathematica => {
            let entries: Vec<String> = report
                .samples
                .iter()
                .map(|s| {
                    let times: Vec<String> = s.times_ms.iter().map(|t| format!("{t:.4}")).collect();
                    format!(
                        "{{\"{}\", {}, {{{}}}}}",
                        s.method.name(),
                        s.sigma_size,
                        times.join(", ")
                    )
                })
                .collect();
            let _ = writeln!(out, "{{{}}}", entries.join(", "));
        }
        ReportFormat::Javascript => {
            let mut methods: Vec<Method> = Vec::new();
            for s in &report.samples {
                if !methods.contains(&s.method) {
                    methods.push(s.method);
                }
            }
            for m in methods {
                let means: Vec<String> = report
                    .samples
                    .iter()
                    .filter(|s| s.method == m)
                    .map(|s| format!("{:.4}", s.mean()))
                    .collect();
                let _ = writeln!(out, "var {}Mean = [{}];", m.name(), means.join(", "));
            }
        }
        ReportFormat::Json => {
            out = serde_json::to_string_pretty(report)
                .map_err(|e| crate::PyrError::Config(format!("serialize report: {e}")))?;
            out.push('\n');
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerState;
    use crate::PyrError;
    use std::time::Duration;

    /// Controller that fakes timings and fails for one method.
    struct FakeController {
        state: ControllerState,
        method: Option<Method>,
        runs: usize,
        failing: Method,
        source: HostImage,
    }

    impl FakeController {
        fn new(failing: Method) -> Self {
            Self {
                state: ControllerState::Initialized,
                method: None,
                runs: 0,
                failing,
                source: HostImage::synthetic(32, 16),
            }
        }
    }

    impl PyramidController for FakeController {
        fn layout(&self) -> Layout {
            Layout::Buffer
        }

        fn state(&self) -> ControllerState {
            self.state
        }

        fn init(&mut self, _source: &HostImage) -> PyrResult<()> {
            self.state.check_init()
        }

        fn set_configuration(&mut self, method: Method, _sigma_size: usize) -> PyrResult<()> {
            self.state.check_configure()?;
            if method == self.failing {
                return Err(PyrError::UnsupportedMethod {
                    layout: "buffer".into(),
                    method: method.to_string(),
                });
            }
            self.method = Some(method);
            self.state = ControllerState::ConfigurationSet;
            Ok(())
        }

        fn run_method(&mut self) -> PyrResult<Duration> {
            self.state.check_run()?;
            self.runs += 1;
            self.state = ControllerState::ResultsReady;
            Ok(Duration::from_micros(1500))
        }

        fn read_levels(&mut self) -> PyrResult<Vec<HostImage>> {
            reference::build_pyramid(&self.source)
        }

        fn read_images(&mut self) -> PyrResult<PyramidReadback> {
            self.state.check_results()?;
            let levels = reference::build_pyramid(&self.source)?;
            let k = DerivativeKernels::for_sigma_size(1)?;
            let gx = levels
                .iter()
                .map(|l| reference::correlate(l, &k.gx, BorderMode::Reflect101))
                .collect();
            let gy = levels
                .iter()
                .map(|l| reference::correlate(l, &k.gy, BorderMode::Reflect101))
                .collect();
            Ok(PyramidReadback { levels, gx, gy })
        }
    }

    fn config() -> BenchConfig {
        BenchConfig {
            methods: vec![Method::Single, Method::Double, Method::SingleLocal],
            sigma_sizes: vec![1, 2],
            iterations: 3,
            ..BenchConfig::default()
        }
    }

    #[test]
    fn test_failure_does_not_block_batch() {
        let mut fake = FakeController::new(Method::Double);
        let report = run_batch(&mut fake, &config(), 32, 16);
        assert_eq!(report.samples.len(), 4);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.method == Method::Double));
        assert_eq!(fake.runs, 12);
    }

    #[test]
    fn test_sample_stats() {
        let s = Sample {
            method: Method::Single,
            sigma_size: 1,
            times_ms: vec![1.0, 2.0, 6.0],
        };
        assert_eq!(s.min(), 1.0);
        assert_eq!(s.max(), 6.0);
        assert_eq!(s.mean(), 3.0);
    }

    #[test]
    fn test_verification_against_reference() {
        let mut fake = FakeController::new(Method::Double);
        let mut cfg = config();
        cfg.verify = true;
        cfg.sigma_sizes = vec![1];
        let report = run_batch(&mut fake, &cfg, 32, 16);
        assert_eq!(report.verifications.len(), 2);
        for v in &report.verifications {
            assert_eq!(v.max_error_gx, 0.0);
            assert_eq!(v.max_error_gy, 0.0);
        }
    }

    #[test]
    fn test_verify_levels_exact() {
        let mut fake = FakeController::new(Method::Double);
        let levels = fake.read_levels().unwrap();
        assert_eq!(verify_levels(&levels, &fake.source).unwrap(), 0.0);
    }

    #[test]
    fn test_verify_levels_rejects_nan() {
        let mut fake = FakeController::new(Method::Double);
        let mut levels = fake.read_levels().unwrap();
        levels[3].set(1, 1, f32::NAN);
        assert_eq!(verify_levels(&levels, &fake.source).unwrap(), f32::INFINITY);
        levels.pop();
        assert!(verify_levels(&levels, &fake.source).is_err());
    }

    #[test]
    fn test_formats() {
        let mut fake = FakeController::new(Method::Double);
        let report = run_batch(&mut fake, &config(), 32, 16);

        let table = format_report(&report, ReportFormat::Table).unwrap();
        assert!(table.contains("singleLocal"));
        assert!(table.contains("failed"));

        let m = format_report(&report, ReportFormat::Mathematica).unwrap();
        assert!(m.starts_with("{{\"single\", 1, {1.5000, 1.5000, 1.5000}}"));

        let js = format_report(&report, ReportFormat::Javascript).unwrap();
        assert!(js.contains("var singleMean = [1.5000, 1.5000];"));
        assert!(!js.contains("buffer"));

        let json = format_report(&report, ReportFormat::Json).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["samples"].as_array().unwrap().len(), 4);
        assert_eq!(v["layout"], "buffer");
    }
}
