use crate::config::Config;
use crate::error::PipelineError;
use crate::hits::FilterOutcome;
use crate::motif::{self, MotifAggregate};
use crate::pipeline::{BranchKey, Pipeline, PipelineContext, Stage};
use crate::tools::{ExternalToolchain, Toolchain};
use crate::workspace::{sanitize_name, Workspace};
use anyhow::{bail, Context, Result};
use bigdecimal::{BigDecimal, Zero};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Cross-taxon protein motif comparison pipeline",
    long_about = "crossmotif retrieves a protein family for a taxon, aligns it, scans every \
member for motifs, and for any chosen motif builds a searchable subset database to compare a \
cross-taxon query against, filtering hits by e-value.\n\nArtifacts are saved in ./<query-name>/."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: retrieve, align, scan, then branch comparisons
    Run {
        /// Protein family to search for (e.g. "pyruvate kinase")
        #[arg(short, long)]
        family: String,

        /// Taxonomic group of the main query (name or txid)
        #[arg(short, long)]
        taxon: String,

        /// Workspace/query name; derived from family and taxon if omitted
        #[arg(short, long)]
        name: Option<String>,

        /// Keep sequences annotated as partial in the retrieval
        #[arg(long, default_value = "false")]
        include_partial: bool,

        /// Skip the alignment stage
        #[arg(long, default_value = "false")]
        skip_align: bool,

        /// Motif to branch on immediately, without prompting
        #[arg(long, requires = "cross_taxon")]
        motif: Option<String>,

        /// Cross-taxon query for the immediate branch
        #[arg(long)]
        cross_taxon: Option<String>,

        /// Accession to use as the cross-taxon query sequence
        #[arg(long)]
        accession: Option<String>,

        /// E-value threshold for the immediate branch (e.g. 1e-5)
        #[arg(long, value_parser = parse_threshold)]
        threshold: Option<BigDecimal>,

        /// Base directory for workspaces
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },

    /// Replay the branch stages against an existing query with a new motif
    /// and/or cross-taxon query
    Branch {
        /// Query name of the existing workspace
        #[arg(short, long)]
        name: String,

        /// Motif to build the subset database from
        #[arg(short, long)]
        motif: Option<String>,

        /// Cross-taxon query to compare against the subset database
        #[arg(short = 't', long)]
        cross_taxon: Option<String>,

        /// Accession to use as the cross-taxon query sequence
        #[arg(long)]
        accession: Option<String>,

        /// E-value threshold (e.g. 1e-5); prompted for if omitted
        #[arg(long, value_parser = parse_threshold)]
        threshold: Option<BigDecimal>,

        /// Base directory for workspaces
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },

    /// Summarize the stage, motifs, and completed branches of a query
    Report {
        /// Query name of the existing workspace
        #[arg(short, long)]
        name: String,

        /// Base directory for workspaces
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },

    /// Remove a query workspace and every artifact in it
    Clean {
        /// Query name of the workspace to remove
        #[arg(short, long)]
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long, default_value = "false")]
        yes: bool,

        /// Base directory for workspaces
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
}

/// Main entry point for the CLI.
pub fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            family,
            taxon,
            name,
            include_partial,
            skip_align,
            motif,
            cross_taxon,
            accession,
            threshold,
            base_dir,
        } => run_query(
            &family,
            &taxon,
            name.as_deref(),
            include_partial,
            skip_align,
            motif.as_deref(),
            cross_taxon.as_deref(),
            accession.as_deref(),
            threshold,
            &base_dir,
        ),
        Commands::Branch {
            name,
            motif,
            cross_taxon,
            accession,
            threshold,
            base_dir,
        } => run_branch_command(
            &name,
            motif.as_deref(),
            cross_taxon.as_deref(),
            accession.as_deref(),
            threshold,
            &base_dir,
        ),
        Commands::Report { name, base_dir } => report(&name, &base_dir),
        Commands::Clean {
            name,
            yes,
            base_dir,
        } => clean(&name, yes, &base_dir),
    }
}

/// Validates a CLI threshold: any positive decimal, scientific notation
/// included.
fn parse_threshold(raw: &str) -> std::result::Result<BigDecimal, String> {
    let value = BigDecimal::from_str(raw.trim())
        .map_err(|e| format!("`{}` is not a decimal: {}", raw, e))?;
    if value <= BigDecimal::zero() {
        return Err(format!("threshold must be greater than zero, got `{}`", raw));
    }
    Ok(value)
}

#[allow(clippy::too_many_arguments)]
fn run_query(
    family: &str,
    taxon: &str,
    name: Option<&str>,
    include_partial: bool,
    skip_align: bool,
    motif: Option<&str>,
    cross_taxon: Option<&str>,
    accession: Option<&str>,
    threshold: Option<BigDecimal>,
    base_dir: &PathBuf,
) -> Result<()> {
    let config = Config::from_env();
    let tools = ExternalToolchain::new(config.clone());

    let query_name = match name {
        Some(n) => n.to_string(),
        None => sanitize_name(&format!("{} {}", family, taxon)),
    };
    let workspace = Workspace::create(base_dir, &query_name)?;
    let pipeline = Pipeline::new(&tools, &workspace);
    let mut ctx = PipelineContext::new(workspace.query_name());

    println!(
        "Retrieving protein sequences for `{}` in `{}`...",
        family, taxon
    );
    match pipeline.retrieve(&mut ctx, family, taxon, include_partial) {
        Ok(count) => println!(
            "Retrieved {} sequences, saved to {}",
            count,
            workspace.retrieval_fasta().display()
        ),
        Err(e) if is_retrieval_empty(&e) => {
            // Nothing retrieved: no partial state is kept.
            workspace.teardown()?;
            bail!("No results for your query. Please start again with a different search.");
        }
        Err(e) => return Err(e),
    }

    if skip_align {
        println!("Skipping alignment stage.");
    } else {
        println!("Aligning query sequences...");
        pipeline.align(&mut ctx)?;
        println!(
            "Aligned sequences saved to {}",
            workspace.aligned_fasta().display()
        );
    }

    println!("Scanning each sequence for motifs...");
    let aggregate = pipeline.scan_motifs(&mut ctx)?;
    print_aggregate(&aggregate);
    println!(
        "Full per-sequence reports saved to {}",
        workspace.motif_report_file().display()
    );

    if let (Some(motif), Some(cross_taxon)) = (motif, cross_taxon) {
        return run_branch(
            &pipeline,
            &mut ctx,
            &config,
            family,
            motif,
            cross_taxon,
            accession,
            threshold,
        );
    }

    branch_loop(&pipeline, &mut ctx, &config, family, &aggregate)
}

fn run_branch_command(
    name: &str,
    motif: Option<&str>,
    cross_taxon: Option<&str>,
    accession: Option<&str>,
    threshold: Option<BigDecimal>,
    base_dir: &PathBuf,
) -> Result<()> {
    let config = Config::from_env();
    let tools = ExternalToolchain::new(config.clone());
    let workspace = Workspace::open(base_dir, name)?;
    let pipeline = Pipeline::new(&tools, &workspace);
    let mut ctx = PipelineContext::load(&workspace)?;

    if ctx.stage < Stage::MotifScanned {
        bail!(
            "Query `{}` is at stage {}; run the pipeline through the motif scan first.",
            name,
            ctx.stage
        );
    }
    let reports = match ctx.motif_reports.clone() {
        Some(reports) => reports,
        // Older manifests carry no report list; rebuild it from the combined
        // scan report file.
        None => {
            let combined = fs::read_to_string(workspace.motif_report_file()).with_context(
                || {
                    format!(
                        "No motif reports in the manifest and no combined report at {}",
                        workspace.motif_report_file().display()
                    )
                },
            )?;
            let recovered = motif::parse_combined(&combined);
            ctx.motif_reports = Some(recovered.clone());
            recovered
        }
    };
    let aggregate = motif::aggregate(&reports);
    if aggregate.is_empty() {
        bail!(
            "No motifs were found in query `{}`; there is nothing to branch on.",
            name
        );
    }

    // The family is not stored separately; the query name stands in for it
    // in candidate searches when branching a resumed context.
    let family = ctx.query_name.replace('_', " ");

    match (motif, cross_taxon) {
        (Some(motif), Some(cross_taxon)) => run_branch(
            &pipeline,
            &mut ctx,
            &config,
            &family,
            motif,
            cross_taxon,
            accession,
            threshold,
        ),
        _ => branch_loop(&pipeline, &mut ctx, &config, &family, &aggregate),
    }
}

/// One interactive pass over the re-entrant branch stages: pick a motif,
/// pick a cross-taxon query, run, filter, repeat while the user wants to.
fn branch_loop(
    pipeline: &Pipeline<'_, impl Toolchain>,
    ctx: &mut PipelineContext,
    config: &Config,
    family: &str,
    aggregate: &MotifAggregate,
) -> Result<()> {
    if aggregate.is_empty() {
        println!("No motifs found, so no subset database can be built.");
        return Ok(());
    }
    loop {
        if !confirm("Run a cross-taxon comparison against a motif subset database?")? {
            return Ok(());
        }
        let names: Vec<&str> = aggregate.iter().map(|(name, _)| name).collect();
        println!("Pick the motif to build the subset database from:");
        for (i, (name, count)) in aggregate.iter().enumerate() {
            println!("{}: {} (found {} times)", i + 1, name, count);
        }
        let motif = names[choose_number(names.len())? - 1].to_string();

        let cross_taxon = prompt("What is the taxon of the new query to compare against?")?;
        if cross_taxon.is_empty() {
            println!("No taxon given, abandoning this branch.");
            continue;
        }

        match run_branch(
            pipeline,
            ctx,
            config,
            family,
            &motif,
            &cross_taxon,
            None,
            None,
        ) {
            Ok(()) => {}
            Err(e) if is_recoverable_branch_error(&e) => println!("{}", e),
            Err(e) => return Err(e),
        }

        if !confirm("Run another comparison with a different motif or taxon?")? {
            return Ok(());
        }
    }
}

/// Runs the branch stages for one (motif, cross-taxon) pair.
#[allow(clippy::too_many_arguments)]
fn run_branch(
    pipeline: &Pipeline<'_, impl Toolchain>,
    ctx: &mut PipelineContext,
    config: &Config,
    family: &str,
    motif: &str,
    cross_taxon: &str,
    accession: Option<&str>,
    threshold: Option<BigDecimal>,
) -> Result<()> {
    let key = BranchKey::new(motif, cross_taxon);
    let interactive = threshold.is_none();

    println!("Building subset database for motif `{}`...", motif);
    let subset_size = pipeline.build_motif_subset(ctx, motif)?;
    println!(
        "Database built from {} records carrying the motif.",
        subset_size
    );

    let accession = match accession {
        Some(acc) => acc.to_string(),
        None => {
            let candidates =
                pipeline.candidate_accessions(family, cross_taxon, config.candidate_limit)?;
            if candidates.is_empty() {
                return Err(PipelineError::NoSequenceResolved {
                    query: cross_taxon.to_string(),
                }
                .into());
            }
            if interactive && candidates.len() > 1 {
                println!("Candidate accessions for `{}`:", cross_taxon);
                for (i, acc) in candidates.iter().enumerate() {
                    println!("{}: {}", i + 1, acc);
                }
                println!("Which one should be the comparison query?");
                candidates[choose_number(candidates.len())? - 1].clone()
            } else {
                candidates[0].clone()
            }
        }
    };

    println!("Fetching the sequence for accession `{}`...", accession);
    pipeline.resolve_cross_query(ctx, &key, &accession)?;

    println!(
        "Searching the query against the `{}` subset database...",
        motif
    );
    let rows = pipeline.cross_blast(ctx, &key)?;
    if rows == 0 {
        println!("The comparison produced no hits. Abandoning this branch.");
        pipeline.abandon_branch(ctx, &key)?;
        return Ok(());
    }
    println!("Comparison finished with {} hits.", rows);

    filter_loop(pipeline, ctx, &key, threshold)
}

/// Threshold retry loop. The core reports the lowest e-value on an empty
/// pass-list; interactively that feeds the re-prompt, non-interactively it
/// abandons the branch.
fn filter_loop(
    pipeline: &Pipeline<'_, impl Toolchain>,
    ctx: &mut PipelineContext,
    key: &BranchKey,
    mut threshold: Option<BigDecimal>,
) -> Result<()> {
    let interactive = threshold.is_none();
    loop {
        let value = match threshold.take() {
            Some(v) => v,
            None => match parse_threshold(&prompt(
                "What is your e-value threshold for a significant match? (e.g. 1e-5)",
            )?) {
                Ok(v) => v,
                Err(msg) => {
                    println!("{}", msg);
                    continue;
                }
            },
        };

        match pipeline.filter_branch(ctx, key, &value)? {
            FilterOutcome::Passed(ranked) => {
                println!("Top hits sorted by e-value:");
                for hit in ranked.iter().take(3) {
                    println!(
                        "  {} -> {}  identity {:.2}%  e-value {}",
                        hit.query_accession,
                        hit.subject_accession,
                        hit.percent_identity,
                        hit.e_value
                    );
                }
                if let Some(best) = ranked.first() {
                    println!(
                        "Most significant match: accession {} (e-value {})",
                        best.subject_accession, best.e_value
                    );
                }
                println!(
                    "{} hits at or below {} saved; normalized table with named columns alongside.",
                    ranked.len(),
                    value
                );
                return Ok(());
            }
            FilterOutcome::NoneBelowThreshold { lowest } => {
                println!(
                    "No hit has an e-value at or below {}. The lowest present is {}.",
                    value, lowest
                );
                if !interactive {
                    println!("Abandoning this branch.");
                    pipeline.abandon_branch(ctx, key)?;
                    return Ok(());
                }
                println!("Please choose a looser threshold.");
            }
        }
    }
}

fn report(name: &str, base_dir: &PathBuf) -> Result<()> {
    let workspace = Workspace::open(base_dir, name)?;
    let ctx = PipelineContext::load(&workspace)?;

    println!("Query `{}` (stage: {})", ctx.query_name, ctx.stage);
    println!("Sequences in store: {}", ctx.sequences.len());
    if let Some(reports) = &ctx.motif_reports {
        print_aggregate(&motif::aggregate(reports));
    }
    if ctx.branches().is_empty() {
        println!("No completed comparison branches.");
    } else {
        println!("Completed branches:");
        for branch in ctx.branches() {
            println!(
                "  {}: {} hits at or below {}, best {} (e-value {})",
                branch.key,
                branch.hits.len(),
                branch.threshold,
                branch.best.subject_accession,
                branch.best.e_value
            );
        }
    }
    Ok(())
}

fn clean(name: &str, yes: bool, base_dir: &PathBuf) -> Result<()> {
    let workspace = Workspace::open(base_dir, name)?;
    if !yes
        && !confirm(&format!(
            "Remove workspace {} and every artifact in it?",
            workspace.root().display()
        ))?
    {
        println!("Leaving the workspace in place.");
        return Ok(());
    }
    let root = workspace.root().to_path_buf();
    workspace.teardown()?;
    println!("Removed {}", root.display());
    Ok(())
}

fn print_aggregate(aggregate: &MotifAggregate) {
    if aggregate.is_empty() {
        println!("No motifs found in the protein sequence query.");
        return;
    }
    println!("Summary of motifs found in the query:");
    for (name, count) in aggregate.iter() {
        println!("  Found the motif {} {} times.", name, count);
    }
}

fn is_retrieval_empty(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<PipelineError>(),
        Some(PipelineError::RetrievalEmpty { .. })
    )
}

/// Branch failures the interactive loop can recover from by picking
/// different parameters.
fn is_recoverable_branch_error(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<PipelineError>(),
        Some(
            PipelineError::NoMatchingRecords { .. }
                | PipelineError::NoSequenceResolved { .. }
                | PipelineError::EmptyInput
        )
    )
}

fn prompt(message: &str) -> Result<String> {
    println!("{}", message);
    print!("> ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn confirm(message: &str) -> Result<bool> {
    loop {
        let answer = prompt(&format!("{} [y/n]", message))?;
        match answer.to_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("Please answer 'y' or 'n'."),
        }
    }
}

/// Reads a 1-based choice from a printed list of `len` options.
fn choose_number(len: usize) -> Result<usize> {
    loop {
        let answer = prompt("Input the number of your choice.")?;
        match answer.parse::<usize>() {
            Ok(n) if (1..=len).contains(&n) => return Ok(n),
            _ => println!("Please enter a number between 1 and {}.", len),
        }
    }
}
