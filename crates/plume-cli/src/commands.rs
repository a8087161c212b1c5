//! CLI command implementations.

use clap::ValueEnum;

use plume_bench::gradcheck::GradCheck;
use plume_bench::metrics::BenchmarkMetrics;
use plume_bench::runner::BenchmarkRunner;
use plume_bench::scenarios::{Scenario, ScenarioKind};
use plume_core::EngineConfig;

/// Engine config presets.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigPreset {
    Default,
    Debug,
    HighQuality,
}

/// Run benchmark suite.
pub fn benchmark(
    scenario_name: &str,
    output_path: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Plume Benchmark Suite");
    println!("═════════════════════");
    println!();

    let scenarios: Vec<ScenarioKind> = if scenario_name == "all" {
        ScenarioKind::all().to_vec()
    } else {
        let kind = ScenarioKind::from_name(scenario_name).ok_or_else(|| {
            let available: Vec<&str> = ScenarioKind::all().iter().map(|k| k.name()).collect();
            format!(
                "Unknown scenario: '{scenario_name}'. Available: {}, all",
                available.join(", ")
            )
        })?;
        vec![kind]
    };

    let mut all_metrics = Vec::new();
    for &kind in &scenarios {
        let scenario = Scenario::from_kind(kind)?;
        println!(
            "Running: {} ({} cells, {} steps, {} cameras)",
            kind.name(),
            scenario.config.grid.cell_count(),
            scenario.steps(),
            scenario.cameras.len(),
        );

        let metrics =
            BenchmarkRunner::run(&scenario).map_err(|e| format!("Benchmark failed: {e}"))?;

        println!("  Forward:      {:.3}ms", metrics.forward_time * 1000.0);
        println!("  Backward:     {:.3}ms", metrics.backward_time * 1000.0);
        println!("  Peak memory:  {} bytes", metrics.peak_memory_bytes);
        println!("  Check error:  {:.3e}", metrics.check_error);
        println!();

        all_metrics.push(metrics);
    }

    if let Some(path) = output_path {
        std::fs::write(path, BenchmarkMetrics::to_csv(&all_metrics))?;
        println!("Results written to: {path}");
    } else {
        println!("CSV Output:");
        println!("{}", BenchmarkMetrics::to_csv(&all_metrics));
    }
    Ok(())
}

/// Run the finite-difference gradient checks.
pub fn gradcheck(
    samples: usize,
    seed: u64,
    output_path: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Plume Gradient Check");
    println!("────────────────────");
    println!();

    let check = GradCheck {
        samples,
        ..GradCheck::default()
    }
    .with_seed(seed);
    let reports = check.run_suite()?;

    for r in &reports {
        let mark = if r.passed() { "✅" } else { "❌" };
        println!(
            "{mark} {:<32} {:>3}/{:<3} max abs {:.2e}  max rel {:.2e}",
            r.target,
            r.samples - r.failures,
            r.samples,
            r.max_abs_error,
            r.max_rel_error,
        );
    }

    if let Some(path) = output_path {
        std::fs::write(path, serde_json::to_string_pretty(&reports)?)?;
        println!();
        println!("Reports written to: {path}");
    }

    let failed = reports.iter().filter(|r| !r.passed()).count();
    if failed > 0 {
        return Err(format!("{failed} gradient checks failed").into());
    }
    Ok(())
}

/// Print a config preset as TOML.
pub fn config(preset: ConfigPreset) -> Result<(), Box<dyn std::error::Error>> {
    let config = match preset {
        ConfigPreset::Default => EngineConfig::default(),
        ConfigPreset::Debug => EngineConfig::debug(),
        ConfigPreset::HighQuality => EngineConfig::high_quality(),
    };
    print!("{}", config.to_toml_string()?);
    Ok(())
}

/// Validate an engine config file.
pub fn validate(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Plume Validator");
    println!("───────────────");
    println!();

    if !path.ends_with(".toml") {
        return Err(
            format!("unsupported file format for {path}; use .toml (engine config)").into(),
        );
    }
    println!("Validating config: {path}");
    let content = std::fs::read_to_string(path)?;
    match EngineConfig::from_toml_str(&content) {
        Ok(config) => {
            let g = &config.grid;
            println!(
                "✅ Config is valid ({}×{}×{} grid, voxel {}, dt {}).",
                g.nx, g.ny, g.nz, g.voxel_size, config.dt
            );
            Ok(())
        }
        Err(e) => {
            println!("❌ Config validation failed: {e}");
            Err(e.into())
        }
    }
}
