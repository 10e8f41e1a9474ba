use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};

use pincode_service::config::Settings;
use pincode_service::data::loader::{available_years, load_addresses};
use pincode_service::data::merge::merge_address_files;
use pincode_service::geocode::google::GoogleGeocoder;
use pincode_service::reconcile::{FetchMode, FetchPlan, Reconciler};
use pincode_service::report::stats::{statistics, top};
use pincode_service::report::tiers::{format_percentage, DisplayMode};
use pincode_service::report::{diagnose, summarize, write_summaries, YearFilter};
use pincode_service::CoordinateCache;

#[derive(Parser)]
#[command(name = "pincode-service", about = "Pincode coordinate cache and customer summaries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the pincode coordinate cache up to date with the address data.
    Fetch {
        /// use-existing, append or refetch. Asked interactively when omitted.
        #[arg(long)]
        mode: Option<FetchMode>,
        /// Skip the confirmation before paid geocoding requests.
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        addresses: Option<PathBuf>,
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Print per-pincode customer summaries.
    Summary {
        #[arg(long)]
        year: Option<i32>,
        /// count or percentage
        #[arg(long, default_value = "count")]
        display: DisplayMode,
        #[arg(long, default_value_t = 20)]
        top: usize,
        /// Write every summary to this CSV file.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        addresses: Option<PathBuf>,
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Merge several address exports into one CSV.
    Merge {
        #[arg(long)]
        output: PathBuf,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Fetch {
            mode,
            yes,
            addresses,
            cache,
        } => fetch(mode, yes, addresses, cache),
        Command::Summary {
            year,
            display,
            top,
            output,
            addresses,
            cache,
        } => summary(year, display, top, output, addresses, cache),
        Command::Merge { output, inputs } => merge(&inputs, output),
    };

    if let Err(err) = result {
        error!("{}", err);
        process::exit(1);
    }
}

fn fetch(
    mode: Option<FetchMode>,
    yes: bool,
    addresses: Option<PathBuf>,
    cache_path: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env()?;
    let cache_path = cache_path.unwrap_or_else(|| settings.cache_path.clone());
    let address_path = addresses.unwrap_or_else(|| settings.address_path.clone());

    let cache_exists = cache_path.exists();
    let mut cache = CoordinateCache::load_or_empty(&cache_path)?;
    let mode = match mode {
        Some(mode) => mode,
        None if cache_exists => {
            println!("Cache file '{}' already exists", cache_path.display());
            let answer = prompt(
                "Do you want to (U)se existing, (A)ppend new pincodes, or (R)efetch all? [U/A/R]: ",
            )?;
            FetchMode::from_answer(&answer)
        }
        None => FetchMode::RefetchAll,
    };

    if mode == FetchMode::UseExisting {
        println!("Using existing cache file: {} ({} pincodes)", cache_path.display(), cache.len());
        return Ok(());
    }

    let cleaned = load_addresses(&address_path)?;
    let plan = FetchPlan::new(mode, &cleaned.records, &cache);
    println!(
        "Found {} unique pincodes, {} need fetching",
        plan.observed,
        plan.pincodes.len()
    );
    if plan.is_empty() {
        println!("All pincodes already cached!");
        return Ok(());
    }

    println!(
        "This will make {} geocoding requests (about ${:.2} after the free tier)",
        plan.pincodes.len(),
        plan.estimated_cost_usd()
    );
    if !yes && !prompt("Proceed? [y/N]: ")?.eq_ignore_ascii_case("y") {
        println!("Cancelled");
        return Ok(());
    }

    let geocoder = GoogleGeocoder::new(
        settings.api_key()?,
        &settings.country,
        &settings.region,
        settings.request_timeout,
    )?;
    let reconciler = Reconciler::new(geocoder)
        .with_pacing(settings.pacing)
        .with_retry(settings.retry);
    let report = reconciler.run(&plan, &mut cache, &cache_path)?;

    println!("Attempted:  {}", report.attempted);
    println!("Resolved:   {}", report.resolved);
    println!(
        "Skipped:    {} (no result {}, rejected {}, gave up after retries {})",
        report.skipped(),
        report.no_result,
        report.permanent_failures,
        report.transient_failures
    );
    println!("Cache file: {} ({} pincodes)", cache_path.display(), cache.len());
    Ok(())
}

fn summary(
    year: Option<i32>,
    display: DisplayMode,
    top_n: usize,
    output: Option<PathBuf>,
    addresses: Option<PathBuf>,
    cache_path: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env()?;
    let cache_path = cache_path.unwrap_or_else(|| settings.cache_path.clone());
    let address_path = addresses.unwrap_or_else(|| settings.address_path.clone());

    let cleaned = load_addresses(&address_path)?;
    let cache = CoordinateCache::load(&cache_path)?;
    let filter = year.map_or(YearFilter::AllYears, YearFilter::Year);

    let years = available_years(&cleaned.records);
    info!("Registration years available: {:?}", years);
    if let Some(year) = year {
        if !years.contains(&year) {
            warn!("No records registered in {}", year);
        }
    }

    let diagnostics = diagnose(&cleaned.records, &cache, filter);
    if diagnostics.unresolved_rows > 0 {
        warn!(
            "{} of {} records dropped, {} pincodes have no cached coordinate",
            diagnostics.unresolved_rows,
            diagnostics.input_rows,
            diagnostics.unresolved_pincodes.len()
        );
    }

    let summaries = summarize(&cleaned.records, &cache, filter);
    let stats = statistics(&summaries);
    println!("Total customers:     {}", stats.total_customers);
    println!("Unique pincodes:     {}", stats.unique_pincodes);
    if let (Some(mean), Some(max)) = (stats.mean_per_pincode, stats.max_per_pincode) {
        println!("Average per pincode: {:.1}", mean);
        println!("Max at one pincode:  {}", max);
    }
    if let Some(center) = stats.center {
        println!("Map centre:          {:.4}, {:.4}", center.lat, center.lon);
    }

    println!();
    println!(
        "{:<24} {:>8} {:<20} {:>10} {:>10} {:<10}",
        "City", "Pincode", "State", "Customers", "Share", "Tier"
    );
    for s in top(&summaries, top_n) {
        println!(
            "{:<24} {:>8} {:<20} {:>10} {:>10} {:<10}",
            s.dominant_city.as_deref().unwrap_or("-"),
            s.pincode,
            s.dominant_state.as_deref().unwrap_or("-"),
            s.customer_count,
            format_percentage(s.percentage),
            display.tier(s)
        );
    }

    if let Some(output) = output {
        let file = File::create(&output)?;
        write_summaries(&summaries, file)?;
        info!("Wrote {} summaries to {}", summaries.len(), output.display());
    }
    Ok(())
}

fn merge(inputs: &[PathBuf], output: PathBuf) -> Result<(), Box<dyn Error>> {
    let report = merge_address_files(inputs, &output)?;
    for file in &report.files {
        println!(
            "{}: {} records, {} dropped, {} unique pincodes",
            file.path.display(),
            file.loaded,
            file.dropped,
            file.unique_pincodes
        );
    }
    println!(
        "Created {}: {} records, {} unique pincodes",
        output.display(),
        report.total_records,
        report.unique_pincodes
    );
    println!("Columns: {}", report.columns.join(", "));
    Ok(())
}

fn prompt(question: &str) -> io::Result<String> {
    print!("{}", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().to_owned())
}
