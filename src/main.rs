use anyhow::{bail, Context, Result};
use assured_sentinel::calibration::{
    baseline_loader, exceedance_rate, quantile_level, CalibrationRunner, DatasetLoader,
    DirectoryDatasetLoader, InjectingLoader, JsonCalibrationStore, JsonlDatasetLoader,
};
use assured_sentinel::config::{Settings, LOCAL_CONFIG_FILE};
use assured_sentinel::correction::{run_correction_loop, CommandGenerator, CorrectionAttempt};
use assured_sentinel::gate::{Commander, ThresholdSource};
use assured_sentinel::logging::init_logging;
use assured_sentinel::scan::{scan_path, ScanOptions};
use assured_sentinel::scoring::BanditScorer;
use assured_sentinel::util::{preview_line, truncate};
use assured_sentinel::{VerificationResult, VerificationStatus};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const DEMO_THRESHOLD: f64 = 0.15;
const DEFAULT_PROMPT: &str = "Write a Python function to calculate factorial.";

const DEMO_CASES: &[(&str, &str)] = &[
    ("Dangerous: exec() with user input", "exec(user_input)"),
    ("Dangerous: eval() with input", "result = eval(input('Enter: '))"),
    ("Dangerous: pickle.loads()", "import pickle\ndata = pickle.loads(untrusted)"),
    (
        "Safe: Simple factorial",
        "def factorial(n):\n    return 1 if n <= 1 else n * factorial(n-1)",
    ),
    ("Safe: Hello World", "print('Hello, World!')"),
    ("Safe: List comprehension", "squares = [x**2 for x in range(10)]"),
    ("Low Risk: Hardcoded password", "password = 'supersecret123'"),
    ("Low Risk: Weak random", "import random\nprint(random.random())"),
];

#[derive(Parser, Debug)]
#[command(
    name = "sentinel",
    about = "Conformal verification gate for machine-generated code",
    version
)]
struct Cli {
    /// Config file (defaults to ./sentinel.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify a code snippet
    Verify(VerifyArgs),
    /// Calibrate the threshold against a benign corpus
    Calibrate(CalibrateArgs),
    /// Verify every source file under a path
    Scan(ScanArgs),
    /// Run fixed safe and unsafe samples through the gate
    Demo,
    /// Show the active threshold and its provenance
    Status,
    /// Generate code with an external command until the gate accepts it
    Run(RunArgs),
    /// Write a settings file with the defaults
    InitConfig(InitConfigArgs),
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Code to verify (read from stdin when omitted and stdin is piped)
    code: Option<String>,
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Override the threshold for this call
    #[arg(short, long)]
    threshold: Option<f64>,
    #[arg(short, long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    #[arg(short, long)]
    alpha: Option<f64>,
    #[arg(short = 'n', long)]
    samples: Option<usize>,
    /// Directory of source files or a JSONL file (built-in corpus when omitted)
    #[arg(short, long)]
    dataset: Option<PathBuf>,
    /// JSONL field holding the code
    #[arg(long, default_value = "code")]
    field: String,
    /// File extension picked up from a dataset directory
    #[arg(long, default_value = "py")]
    extension: String,
    #[arg(long)]
    injection_rate: Option<f64>,
    #[arg(short, long)]
    workers: Option<usize>,
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ScanArgs {
    path: PathBuf,
    #[arg(short, long)]
    recursive: bool,
    #[arg(short, long)]
    threshold: Option<f64>,
    /// Only report rejections
    #[arg(short, long)]
    quiet: bool,
    #[arg(short, long)]
    json: bool,
    #[arg(long, default_value = "py")]
    extension: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    prompt: Option<String>,
    /// Generator command; the prompt is passed as its last argument
    #[arg(short, long)]
    generator: String,
    #[arg(short, long)]
    retries: Option<u32>,
    /// Seconds to wait for each generation
    #[arg(long, default_value_t = 120)]
    generator_timeout: u64,
}

#[derive(Args, Debug)]
struct InitConfigArgs {
    #[arg(long)]
    path: Option<PathBuf>,
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::InitConfig(args) = &cli.command {
        return cmd_init_config(args);
    }

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level.as_deref() {
        settings
            .set_log_level(level)
            .context("Invalid --log-level")?;
    }
    if cli.log_json {
        settings.logging.json = true;
    }
    init_logging(&settings.logging);

    match cli.command {
        Commands::Verify(args) => cmd_verify(&settings, args),
        Commands::Calibrate(args) => cmd_calibrate(&settings, args),
        Commands::Scan(args) => cmd_scan(&settings, args),
        Commands::Demo => cmd_demo(&settings),
        Commands::Status => cmd_status(&settings),
        Commands::Run(args) => cmd_run(&settings, args),
        Commands::InitConfig(_) => Ok(ExitCode::SUCCESS),
    }
}

fn exit_for(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn build_gate(settings: &Settings, threshold: Option<f64>) -> Result<Commander> {
    let gate = Commander::from_settings(settings).context("Invalid gate configuration")?;
    if let Some(threshold) = threshold {
        gate.set_threshold(threshold)?;
    }
    Ok(gate)
}

fn read_code(args: &VerifyArgs) -> Result<String> {
    let code = if let Some(path) = &args.file {
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    } else if let Some(code) = &args.code {
        code.clone()
    } else if !io::stdin().is_terminal() {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read code from stdin")?;
        buf
    } else {
        bail!("No code provided. Use --file, pass code as an argument, or pipe it on stdin.");
    };

    if code.trim().is_empty() {
        bail!("No code provided. Use --file, pass code as an argument, or pipe it on stdin.");
    }
    Ok(code)
}

fn print_result(result: &VerificationResult) {
    let symbol = if result.passed() { "✅" } else { "🚫" };
    println!("{} {}", symbol, result.status());
    println!("   Score: {:.4}", result.score());
    println!("   Threshold: {:.4}", result.threshold());
    if let Some(latency) = result.latency_ms() {
        println!("   Latency: {:.1}ms", latency);
    }
    if !result.passed() {
        println!("   Reason: {}", result.reason());
    }
}

fn cmd_verify(settings: &Settings, args: VerifyArgs) -> Result<ExitCode> {
    let code = read_code(&args)?;
    let gate = build_gate(settings, args.threshold)?;
    let result = gate.verify(&code);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(exit_for(result.passed()))
}

fn cmd_calibrate(settings: &Settings, args: CalibrateArgs) -> Result<ExitCode> {
    let mut config = settings.calibration_config();
    if let Some(alpha) = args.alpha {
        config.alpha = alpha;
    }
    if let Some(samples) = args.samples {
        config.n_samples = samples;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    let rate = args
        .injection_rate
        .unwrap_or(settings.calibration.injection_rate);
    if !(0.0..=1.0).contains(&rate) {
        bail!("Injection rate must be between 0.0 and 1.0, got {}", rate);
    }
    let output = args
        .output
        .unwrap_or_else(|| settings.gate.calibration_path.clone());

    let loader: Box<dyn DatasetLoader> = match &args.dataset {
        None => Box::new(InjectingLoader::new(baseline_loader(), rate)),
        Some(path) if path.is_dir() => Box::new(InjectingLoader::new(
            DirectoryDatasetLoader::new(path, &args.extension),
            rate,
        )),
        Some(path) => Box::new(InjectingLoader::new(
            JsonlDatasetLoader::new(path, &args.field),
            rate,
        )),
    };

    println!("Running calibration with α = {}...", config.alpha);
    let scorer = Arc::new(BanditScorer::new(settings.scoring_config()));
    let store = Arc::new(JsonCalibrationStore::new(&output));
    let runner = CalibrationRunner::new(scorer, loader, store, config);
    let data = runner.run().context("Calibration failed")?;

    println!();
    println!("📊 Calibration complete");
    println!("   Dataset: {} ({} samples)", data.dataset_name, data.n_samples);
    println!("   α: {}", data.alpha);
    println!(
        "   Quantile level: {:.4}",
        quantile_level(data.n_samples, data.alpha)
    );
    println!("   q̂: {:.4}", data.q_hat);
    println!(
        "   Calibration exceedance: {:.1}%",
        exceedance_rate(&data.scores, data.q_hat) * 100.0
    );
    println!("   Saved to {}", output.display());
    if data.scores.iter().all(|s| *s >= 1.0) {
        eprintln!(
            "⚠️  Every sample scored 1.0. Check that '{}' is installed and working.",
            settings.scoring.analyzer
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_scan(settings: &Settings, args: ScanArgs) -> Result<ExitCode> {
    if !args.path.exists() {
        bail!("Path '{}' not found", args.path.display());
    }
    let gate = build_gate(settings, args.threshold)?;
    let options = ScanOptions {
        recursive: args.recursive,
        extension: args.extension.clone(),
        workers: settings.calibration.workers,
    };
    let report = scan_path(&gate, &args.path, &options);

    if report.total == 0 {
        println!(
            "No .{} files found in '{}'",
            options.extension.trim_start_matches('.'),
            args.path.display()
        );
        return Ok(ExitCode::SUCCESS);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for entry in &report.files {
            if entry.status == VerificationStatus::Pass {
                if !args.quiet {
                    println!("✅ {}: PASS (score: {:.2})", entry.file.display(), entry.score);
                }
            } else {
                println!("🚫 {}: REJECT (score: {:.2})", entry.file.display(), entry.score);
            }
        }
        println!();
        println!("--- Summary ---");
        println!(
            "Total: {} | Passed: {} | Rejected: {}",
            report.total, report.passed, report.rejected
        );
    }
    Ok(exit_for(report.all_passed()))
}

fn cmd_demo(settings: &Settings) -> Result<ExitCode> {
    let gate = build_gate(settings, Some(DEMO_THRESHOLD))?;
    println!("🛡️  Assured Sentinel offline demo");
    println!("Threshold (q̂): {}", gate.threshold());
    println!();

    let mut passed = 0;
    for (description, code) in DEMO_CASES {
        let result = gate.verify(code);
        if result.passed() {
            passed += 1;
        }
        println!("📝 {}", description);
        println!("   Code: {}", truncate(&preview_line(code, 60), 50));
        println!("   Score: {}", result.score());
        println!(
            "   {} {}",
            if result.passed() { "✅" } else { "🚫" },
            result.status()
        );
        println!();
    }

    println!("📊 Demo summary");
    println!("   Total: {}", DEMO_CASES.len());
    println!("   Passed: {}", passed);
    println!("   Rejected: {}", DEMO_CASES.len() - passed);
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(settings: &Settings) -> Result<ExitCode> {
    let gate = build_gate(settings, None)?;
    let snapshot = gate.snapshot();

    println!("Threshold: {:.4}", snapshot.value);
    println!("State: {}", snapshot.state());
    match &snapshot.source {
        ThresholdSource::Calibrated {
            calibrated_at,
            alpha,
            n_samples,
            dataset_name,
        } => {
            println!("Calibrated at: {}", calibrated_at.to_rfc3339());
            println!("α: {}  samples: {}  dataset: {}", alpha, n_samples, dataset_name);
        }
        ThresholdSource::Default => println!("Source: default threshold (no usable calibration)"),
        ThresholdSource::Manual => println!("Source: manual override"),
    }
    println!("Calibration file: {}", gate.store().location());
    println!(
        "Analyzer: {} (timeout {}s, {})",
        settings.scoring.analyzer,
        settings.scoring.timeout_secs,
        if settings.scoring.fail_closed {
            "fail-closed"
        } else {
            "fail-open"
        }
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_run(settings: &Settings, args: RunArgs) -> Result<ExitCode> {
    let gate = build_gate(settings, None)?;
    let mut generator = CommandGenerator::from_command_line(&args.generator)?
        .with_timeout(Duration::from_secs(args.generator_timeout));
    let prompt = args.prompt.as_deref().unwrap_or(DEFAULT_PROMPT);
    let max_attempts = args.retries.unwrap_or(settings.correction.max_retries);

    println!(">>> Request: {}", prompt);
    println!();
    let outcome = run_correction_loop(
        &mut generator,
        &gate,
        prompt,
        max_attempts,
        |attempt: &CorrectionAttempt| {
            println!("--- Attempt {}/{} ---", attempt.attempt, max_attempts);
            println!("{}", truncate(&attempt.code, 100));
            println!(
                "[Gate] {} (score: {:.4})",
                attempt.result.status(),
                attempt.result.score()
            );
            println!();
        },
    )?;

    match &outcome.accepted {
        Some(code) => {
            println!("✅ Accepted on attempt {}.", outcome.attempts.len());
            println!();
            println!("{}", code);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("❌ Rejected after {} attempts.", outcome.attempts.len());
            Ok(ExitCode::from(1))
        }
    }
}

fn cmd_init_config(args: &InitConfigArgs) -> Result<ExitCode> {
    let path = args
        .path
        .clone()
        .or_else(Settings::user_config_path)
        .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
    if path.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Settings::default()
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default settings to {}", path.display());
    Ok(ExitCode::SUCCESS)
}
