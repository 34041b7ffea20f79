//! ScoreForge: student scoring and K-Means performance tiers
//!
//! Thin entry point: resolve configuration, load the dataset once through
//! the cache, run the pipeline and print the report.

use anyhow::{Context, Result};
use clap::Parser;
use scoreforge::cli::OutputFormat;
use scoreforge::{analyze, AnalysisReport, Args, Correlation, DatasetCache, StudentRecord};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.resolve_config()?;
    let start_time = Instant::now();

    let cache = DatasetCache::new();
    let outcome = cache.get_or_load(&config.sources);
    let dataset = outcome
        .dataset()
        .context("No dataset found; pass --input with an .xlsx, .csv or .tsv file")?;

    let report = analyze(&dataset.frame, &config)?;
    tracing::info!(
        source = %dataset.source,
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "analysis complete"
    );

    match (args.format, &args.student) {
        (OutputFormat::Json, None) => println!("{}", serde_json::to_string_pretty(&report)?),
        (OutputFormat::Json, Some(id)) => {
            println!("{}", serde_json::to_string_pretty(find_student(&report, id)?)?)
        }
        (OutputFormat::Text, None) => print_overview(&report),
        (OutputFormat::Text, Some(id)) => print_student(find_student(&report, id)?),
    }

    Ok(())
}

fn find_student<'a>(report: &'a AnalysisReport, id: &str) -> Result<&'a StudentRecord> {
    report.student(id).with_context(|| {
        format!(
            "Unknown student '{id}' (expected \"Student 1\" to \"Student {}\")",
            report.students.len()
        )
    })
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

/// Print the class-level view
fn print_overview(report: &AnalysisReport) {
    let summary = &report.summary;
    println!("=== Class Overview ===");
    println!("Students:      {}", summary.count);
    println!("Items:         {}", report.items.len());
    println!("Mean total:    {}", fmt_opt(summary.mean, 1));
    println!("Highest total: {}", fmt_opt(summary.max, 0));
    println!("Lowest total:  {}", fmt_opt(summary.min, 0));
    println!("Std deviation: {}", fmt_opt(summary.std_dev, 2));

    if !report.item_means.is_empty() {
        println!("\n=== Average Score per Item ===");
        for item in &report.item_means {
            println!("{:<16} {:.2}", item.item, item.mean);
        }
    }

    let seg = &report.segmentation;
    println!("\n=== Performance Tiers (k = {}) ===", seg.k);
    for cluster in &seg.clusters {
        let share = cluster.size as f64 / summary.count.max(1) as f64 * 100.0;
        println!(
            "{:<16} cluster {}: {} students ({:.1}%), mean total {:.1}",
            cluster.tier, cluster.id, cluster.size, share, cluster.mean_total
        );
    }
    if let Some(silhouette) = seg.silhouette {
        println!("Silhouette score: {silhouette:.3}");
    }
    println!("Within-cluster sum of squares: {:.2}", seg.inertia);

    if !report.correlation.is_empty() {
        println!("\n=== Item Correlation ===");
        let corr = &report.correlation;
        print!("{:<12}", "");
        for name in &corr.items {
            print!("{name:>10}");
        }
        println!();
        for (i, name) in corr.items.iter().enumerate() {
            print!("{name:<12}");
            for j in 0..corr.len() {
                match corr.at(i, j) {
                    Correlation::Defined(r) => print!("{r:>10.2}"),
                    Correlation::Undefined => print!("{:>10}", "n/a"),
                }
            }
            println!();
        }
    }

    println!("\n=== Item Importance ===");
    match &report.importance {
        Ok(ranking) if ranking.is_empty() => println!("No items to rank"),
        Ok(ranking) => {
            for weight in &ranking.weights {
                println!("{:<16} {:>10.4}", weight.item, weight.coefficient);
            }
        }
        Err(issue) => println!("Not available: {issue}"),
    }

    if !report.students.is_empty() {
        println!("\n=== Students ===");
        for student in &report.students {
            println!(
                "{:<12} total {:>6.1}  {}",
                student.student_id, student.total_score, student.tier
            );
        }
    }
}

/// Print one student's profile
fn print_student(student: &StudentRecord) {
    println!("=== {} ===", student.student_id);
    println!(
        "Total score: {:.1} / {:.0}",
        student.total_score, student.score_ceiling
    );
    println!("Mean score:  {}", fmt_opt(student.mean_score, 2));
    println!("Tier:        {} (cluster {})", student.tier, student.cluster);

    if !student.responses.is_empty() {
        println!("\nAnswer pattern:");
        for response in &student.responses {
            println!("  {:<16} {:.1}", response.item, response.score);
        }
    }
}
