// Fuzzy Record Linkage - Command Line
// match: link a target CSV to a base CSV; normalize: clean phone/date columns in place

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use fuzzy_linkage::logging::init_logging;
use fuzzy_linkage::{Dataset, FieldKind, Linker, MatchConfig, MatchField, MatchResponse, PhoneRules};

#[derive(Parser)]
#[command(
    name = "fuzzy-linkage",
    version,
    about = "Link two exports of the same people by noisy phone numbers and dates"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long = "json-logs", global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Match target rows to base rows and transpose base values
    Match(MatchArgs),

    /// Normalize phone and date columns of one CSV or workbook, written back as CSV
    Normalize(NormalizeArgs),

    /// Print an example configuration as JSON
    Config,
}

#[derive(Args)]
struct MatchArgs {
    /// Base (authoritative) CSV or Excel workbook
    #[arg(long, value_name = "FILE")]
    base: PathBuf,

    /// Target CSV or Excel workbook to enrich
    #[arg(long, value_name = "FILE")]
    target: PathBuf,

    /// JSON configuration; command-line options override it
    #[arg(long, value_name = "JSON")]
    config: Option<PathBuf>,

    /// Base column to match on (repeatable)
    #[arg(long = "field", value_name = "COL")]
    fields: Vec<String>,

    /// Target column paired with each --field, when named differently (repeatable)
    #[arg(long = "target-field", value_name = "COL")]
    target_fields: Vec<String>,

    /// Weight for each --field (repeatable)
    #[arg(long = "weight", value_name = "W")]
    weights: Vec<f64>,

    /// Base column copied onto matched target rows (repeatable)
    #[arg(long = "transpose", value_name = "COL")]
    transpose: Vec<String>,

    /// Minimum confidence, 0-100
    #[arg(long)]
    threshold: Option<f64>,

    /// Each base row may be accepted at most once
    #[arg(long = "one-to-one")]
    one_to_one: bool,

    /// Only score base rows sharing the target's blocking key
    #[arg(long)]
    blocking: bool,

    /// Score on a single thread
    #[arg(long)]
    sequential: bool,

    /// Only match this many target rows
    #[arg(long, value_name = "ROWS")]
    preview: Option<usize>,

    /// First target row of the preview window
    #[arg(long = "preview-start", value_name = "ROW", default_value_t = 0)]
    preview_start: usize,

    /// Directory receiving the output CSV/JSON files
    #[arg(long = "out-dir", value_name = "DIR", default_value = "linkage-output")]
    out_dir: PathBuf,
}

#[derive(Args)]
struct NormalizeArgs {
    #[arg(long, value_name = "CSV")]
    input: PathBuf,

    #[arg(long, value_name = "CSV")]
    output: PathBuf,

    /// Phone column (repeatable)
    #[arg(long = "phone", value_name = "COL")]
    phones: Vec<String>,

    /// Date column (repeatable)
    #[arg(long = "date", value_name = "COL")]
    dates: Vec<String>,

    /// Country calling code for local numbers
    #[arg(long = "country-code", default_value = "373")]
    country_code: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Command::Match(args) => run_match(args),
        Command::Normalize(args) => run_normalize(args),
        Command::Config => print_config(),
    }
}

// ============================================================================
// MATCH
// ============================================================================

fn build_config(args: &MatchArgs) -> Result<MatchConfig> {
    let mut config = match &args.config {
        Some(path) => MatchConfig::from_file(path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?,
        None => MatchConfig::default(),
    };

    if args.fields.is_empty() {
        if !args.weights.is_empty() {
            bail!("--weight applies to --field columns; pass --field as well");
        }
        if !args.target_fields.is_empty() {
            bail!("--target-field pairs with --field columns; pass --field as well");
        }
    } else {
        let target_fields = if args.target_fields.is_empty() {
            args.fields.clone()
        } else {
            args.target_fields.clone()
        };
        config.fields = MatchField::pair_lists(&args.fields, &target_fields, &args.weights)?;
    }
    if !args.transpose.is_empty() {
        config.transpose = args.transpose.clone();
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    config.one_to_one |= args.one_to_one;
    config.blocking |= args.blocking;
    if args.sequential {
        config.parallel = false;
    }

    Ok(config)
}

fn load(path: &Path) -> Result<Dataset> {
    Dataset::load(path).with_context(|| format!("Failed to read dataset: {:?}", path))
}

fn run_match(args: MatchArgs) -> Result<()> {
    println!("🔗 Fuzzy Record Linkage");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = build_config(&args)?;
    let linker = Linker::new(config).context("Invalid match configuration")?;

    println!("\n📂 Loading datasets...");
    let base = load(&args.base)?;
    let mut target = load(&args.target)?;
    println!("✓ Base:   {} rows × {} columns", base.len(), base.columns().len());
    println!("✓ Target: {} rows × {} columns", target.len(), target.columns().len());

    if let Some(rows) = args.preview {
        target = target.slice(args.preview_start, rows);
        println!(
            "👀 Preview: target rows {}..{}",
            target.origin(),
            target.origin() + target.len()
        );
    }

    println!("\n🎯 Matching...");
    let response = linker.run(&base, &target)?;

    write_outputs(&response, &args.out_dir)?;
    print_summary(&response, &args.out_dir);

    Ok(())
}

fn write_outputs(response: &MatchResponse, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", out_dir))?;

    let tables = [
        ("annotated.csv", &response.annotated),
        ("matched.csv", &response.matched),
        ("unmatched_base.csv", &response.unmatched_base),
        ("unmatched_target.csv", &response.unmatched_target),
    ];
    for (file, table) in tables {
        let path = out_dir.join(file);
        table
            .save_csv(&path)
            .with_context(|| format!("Failed to write {:?}", path))?;
    }

    let summary_csv = out_dir.join("summary.csv");
    response
        .summary
        .to_dataset()
        .save_csv(&summary_csv)
        .with_context(|| format!("Failed to write {:?}", summary_csv))?;

    let summary_json = out_dir.join("summary.json");
    let json = serde_json::json!({
        "run": response.run,
        "summary": response.summary,
    });
    fs::write(&summary_json, serde_json::to_string_pretty(&json)?)
        .with_context(|| format!("Failed to write {:?}", summary_json))?;

    info!(out_dir = %out_dir.display(), "outputs written");
    Ok(())
}

fn print_summary(response: &MatchResponse, out_dir: &Path) {
    let summary = &response.summary;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📊 {}", summary.summary());
    println!("   ✓ Total matches:       {}", summary.total_matches);
    println!("   ✓ Exact matches:       {}", summary.exact_matches);
    println!("   ~ Possible matches:    {}", summary.possible_matches);
    println!("   ⚠ Low confidence:      {}", summary.low_confidence_matches);
    println!("   ✗ Unmatched target:    {}", summary.unmatched_target);
    println!("   ✗ Unmatched base:      {}", summary.unmatched_base);

    let histogram = summary.histogram.entries();
    if !histogram.is_empty() {
        println!("\n📈 Score distribution:");
        for (label, count) in histogram {
            println!("   {:>6}: {}", label, count);
        }
    }

    if !summary.value_changes.is_empty() {
        println!("\n🔁 Most frequent changes:");
        for change in summary.value_changes.iter().take(5) {
            println!(
                "   {}: '{}' → '{}' ({}×)",
                change.column, change.from, change.to, change.count
            );
        }
    }

    println!("\n💾 Outputs in {:?} (run {})", out_dir, response.run.run_id);
}

// ============================================================================
// NORMALIZE
// ============================================================================

fn run_normalize(args: NormalizeArgs) -> Result<()> {
    println!("🧹 Normalizing {:?}", args.input);

    let config = MatchConfig {
        phone: PhoneRules::with_country_code(&args.country_code),
        ..Default::default()
    };
    config.phone.validate()?;
    let normalizer = config.normalizer();

    let mut dataset = load(&args.input)?;

    let columns = args
        .phones
        .iter()
        .map(|c| (c, FieldKind::Phone))
        .chain(args.dates.iter().map(|c| (c, FieldKind::Date)));

    for (column, kind) in columns {
        let changed = normalizer.normalize_column(&mut dataset, column, kind)?;
        println!("✓ {} ({}): {} cells changed", column, kind.name(), changed);
    }

    dataset
        .save_csv(&args.output)
        .with_context(|| format!("Failed to write {:?}", args.output))?;
    println!("💾 Saved {} rows to {:?}", dataset.len(), args.output);

    Ok(())
}

// ============================================================================
// CONFIG
// ============================================================================

fn print_config() -> Result<()> {
    let example = MatchConfig::phone_and_date("ContactPhone", "Executed");
    println!("{}", serde_json::to_string_pretty(&example)?);
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
