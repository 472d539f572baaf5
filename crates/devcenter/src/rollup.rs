//! `devcenter rollup`, `validate` and `resolve`.

use std::io::Write;
use std::path::{Path, PathBuf};

use devcenter_rollup::{rollup_files, rollup_reader, HierarchyDef, Resolver, RollupConfig, RollupReport};

use crate::{CliError, HierarchyArgs, OutputFormat};

const STDIN: &str = "-";

fn read_file(path: &Path, what: &str) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|e| CliError::io(format!("cannot read {what} {}: {e}", path.display())))
}

pub fn load_config(path: Option<&Path>) -> Result<RollupConfig, CliError> {
    match path {
        Some(path) => {
            let text = read_file(path, "config")?;
            Ok(RollupConfig::from_toml(&text)?)
        }
        None => Ok(RollupConfig::default()),
    }
}

pub fn load_resolver(args: &HierarchyArgs) -> Result<Resolver, CliError> {
    let def = match (&args.hierarchy, &args.repos_csv) {
        (Some(path), None) => HierarchyDef::from_toml(&read_file(path, "hierarchy")?)?,
        (None, Some(path)) => {
            let file = std::fs::File::open(path)
                .map_err(|e| CliError::io(format!("cannot read repository listing {}: {e}", path.display())))?;
            HierarchyDef::from_repos_csv(file)?
        }
        _ => {
            return Err(CliError::usage("exactly one of --hierarchy or --repos-csv is required")
                .with_hint("devcenter rollup --hierarchy org.toml results.csv"))
        }
    };
    Ok(Resolver::load(&def)?)
}

// ============================================================================
// rollup
// ============================================================================

pub fn cmd_rollup(
    hierarchy: HierarchyArgs,
    config_path: Option<PathBuf>,
    format: OutputFormat,
    output: Option<PathBuf>,
    strict: bool,
    inputs: Vec<String>,
) -> Result<(), CliError> {
    let config = load_config(config_path.as_deref())?;
    let resolver = load_resolver(&hierarchy)?;

    let report = if inputs.iter().any(|i| i == STDIN) {
        if inputs.len() > 1 {
            return Err(CliError::usage("'-' (stdin) cannot be combined with other inputs"));
        }
        let stdin = std::io::stdin();
        rollup_reader("<stdin>", stdin.lock(), &config, &resolver)?
    } else {
        let paths: Vec<PathBuf> = inputs.iter().map(PathBuf::from).collect();
        rollup_files(&paths, &config, &resolver)?
    };

    let rendered = render(&report, format)?;
    match output {
        Some(ref path) => {
            std::fs::write(path, &rendered)
                .map_err(|e| CliError::io(format!("cannot write output {}: {e}", path.display())))?;
            eprintln!("wrote {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&rendered)
                .and_then(|_| stdout.flush())
                .map_err(|e| CliError::io(format!("cannot write output: {e}")))?;
        }
    }

    if strict {
        check_strict(&report, &config)?;
    }
    Ok(())
}

fn render(report: &RollupReport, format: OutputFormat) -> Result<Vec<u8>, CliError> {
    match format {
        OutputFormat::Json => Ok(report.to_json()?.into_bytes()),
        OutputFormat::Csv => {
            let mut out = Vec::new();
            report.write_csv(&mut out)?;
            Ok(out)
        }
        OutputFormat::Text => Ok(report.summary_text().into_bytes()),
    }
}

fn check_strict(report: &RollupReport, config: &RollupConfig) -> Result<(), CliError> {
    let d = &report.diagnostics;
    if d.parse_errors > 0 {
        return Err(CliError::strict(format!("{} rows failed to parse", d.parse_errors))
            .with_hint("rerun with -v to log every skipped row"));
    }
    let threshold = config.diagnostics.unattributed_warn_ratio;
    if report.exceeds_unattributed_ratio(threshold) {
        return Err(CliError::strict(format!(
            "{:.1}% of rows are unattributed (threshold {:.1}%)",
            d.unattributed_ratio() * 100.0,
            threshold * 100.0
        ))
        .with_hint("use `devcenter resolve` to see which repositories match no unit"));
    }
    Ok(())
}

// ============================================================================
// validate
// ============================================================================

pub fn cmd_validate(hierarchy: HierarchyArgs, config_path: Option<PathBuf>) -> Result<(), CliError> {
    if let Some(ref path) = config_path {
        load_config(Some(path.as_path()))?;
        eprintln!("valid: config {}", path.display());
    }
    let resolver = load_resolver(&hierarchy)?;
    eprintln!(
        "valid: {} unit(s), {} organization path(s), {}",
        resolver.unit_count(),
        resolver.paths().len(),
        if resolver.is_exclusive() { "exclusive" } else { "non-exclusive" },
    );
    Ok(())
}

// ============================================================================
// resolve
// ============================================================================

pub fn cmd_resolve(hierarchy: HierarchyArgs, json: bool, repositories: Vec<String>) -> Result<(), CliError> {
    let resolver = load_resolver(&hierarchy)?;

    if json {
        let map: serde_json::Map<String, serde_json::Value> = repositories
            .iter()
            .map(|repo| {
                let paths = resolver
                    .resolve(repo)
                    .iter()
                    .map(|p| serde_json::Value::String(p.to_string()))
                    .collect();
                (repo.clone(), serde_json::Value::Array(paths))
            })
            .collect();
        let text = serde_json::to_string_pretty(&map)
            .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
        println!("{text}");
        return Ok(());
    }

    for repo in &repositories {
        let paths = resolver.resolve(repo);
        let owners = if paths.is_empty() {
            devcenter_rollup::report::UNATTRIBUTED_LABEL.to_string()
        } else {
            paths.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",")
        };
        println!("{repo}\t{owners}");
    }
    Ok(())
}
