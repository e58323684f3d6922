//! rust_degenrich command-line interface

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::{info, LevelFilter};

use rust_degenrich::cli::{find_subcommand, Cli, Commands, EnrichMethod};
use rust_degenrich::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let has_subcommand = args.get(1..).map_or(false, |rest| find_subcommand(rest).is_some());

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rust_degenrich {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .ok();
    }

    let result = match cli.command {
        Some(Commands::Run {
            config,
            output,
            no_plots,
        }) => run_pipeline(&config, output.as_deref(), no_plots),
        Some(Commands::Import {
            tx2gene,
            quant,
            keep_tx_version,
            output,
        }) => run_import(&tx2gene, &quant, !keep_tx_version, &output),
        Some(Commands::De {
            counts,
            metadata,
            status,
            numerator,
            denominator,
            reference,
            covariate,
            min_count,
            min_samples,
            sf_type,
            surrogate_variables,
            annotation,
            id_column,
            symbol_column,
            alpha,
            lfc_cutoff,
            output,
            volcano,
        }) => DeArgs {
            counts: &counts,
            metadata: &metadata,
            status: &status,
            numerator: &numerator,
            denominator: &denominator,
            reference: reference.as_deref(),
            covariates: &covariate,
            min_count,
            min_samples,
            sf_type,
            surrogate_variables,
            annotation: annotation.as_deref(),
            id_column: &id_column,
            symbol_column: &symbol_column,
            alpha,
            lfc_cutoff,
            output: &output,
            volcano: volcano.as_deref(),
        }
        .run(),
        Some(Commands::Enrich {
            results,
            gmt,
            method,
            alpha,
            lfc_cutoff,
            min_size,
            max_size,
            permutations,
            seed,
            output,
            no_plots,
        }) => run_enrich(
            &results,
            &gmt,
            method,
            alpha,
            lfc_cutoff,
            OraParams { min_size, max_size },
            GseaParams {
                min_size,
                max_size,
                permutations,
                seed,
            },
            &output,
            no_plots,
        ),
        Some(Commands::Common {
            results,
            alpha,
            lfc_cutoff,
            output,
        }) => run_common(&results, alpha, lfc_cutoff, &output),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rust_degenrich v{}", VERSION);
    println!("Run `rust_degenrich -h` for usage or `rust_degenrich --help` for detailed information.");
}

fn print_short_help() {
    println!("rust_degenrich v{}", VERSION);
    println!();
    println!("Usage: rust_degenrich <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run     Run the full pipeline from a YAML config");
    println!("  import  Build a gene count matrix from Salmon quant.sf files");
    println!("  de      Test one contrast");
    println!("  enrich  ORA and/or GSEA on a result table");
    println!("  common  DEGs shared by several result tables");
    println!();
    println!("Run `rust_degenrich <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rust_degenrich v{}", VERSION);
    println!("Differential expression and gene set enrichment for RNA-seq");
    println!();
    println!("Usage: rust_degenrich <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run     Run the full pipeline from a YAML config");
    println!("            - count matrix or Salmon quantifications");
    println!("            - surrogate variables for hidden batch effects");
    println!("            - any number of contrasts, common DEGs across them");
    println!("            - ORA and preranked GSEA, volcano / PCA / enrichment plots");
    println!("  import  Build a gene count matrix from Salmon quant.sf files");
    println!("  de      Test one contrast (negative binomial GLM, Wald test)");
    println!("  enrich  ORA and/or GSEA on a result table");
    println!("  common  DEGs shared by several result tables");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -t, --threads    Number of worker threads (0 = all cores)");
    println!("  -h               Print short help (also after a command)");
    println!("      --help       Print detailed help (also after a command)");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rust_degenrich run -c pipeline.yaml");
    println!();
    println!("  rust_degenrich de -c counts.csv -m metadata.csv \\");
    println!("    --numerator ko --denominator wt -o ko_vs_wt.csv");
    println!();
    println!("  rust_degenrich enrich -r ko_vs_wt.csv -g hallmark.gmt -o enrichment");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn run_pipeline(config_path: &str, output: Option<&str>, no_plots: bool) -> Result<()> {
    info!("Loading config from: {}", config_path);
    let mut config = PipelineConfig::from_path(config_path)?;
    if let Some(output) = output {
        config.output_dir = PathBuf::from(output);
    }
    if no_plots {
        config.plots = false;
    }

    let report = Pipeline::from_config(config)?.run()?;
    info!(
        "{} genes, {} samples, {} surrogate variables",
        report.n_genes, report.n_samples, report.n_surrogates
    );
    info!("{} common DEGs", report.common_degs);
    for e in &report.enrichment {
        info!("  {}: {} of {} terms significant", e.label, e.significant, e.terms_tested);
    }
    Ok(())
}

fn run_import(tx2gene_path: &str, samples: &[QuantSample], ignore_version: bool, output: &str) -> Result<()> {
    info!("Loading transcript-to-gene table from: {}", tx2gene_path);
    let tx2gene = TxToGene::from_path(tx2gene_path, ignore_version)?;
    info!("  {} transcripts", tx2gene.len());

    let counts = import_salmon(samples, &tx2gene)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    write_count_matrix(output, &counts)?;
    info!("Count matrix written to: {}", output);
    Ok(())
}

struct DeArgs<'a> {
    counts: &'a str,
    metadata: &'a str,
    status: &'a str,
    numerator: &'a str,
    denominator: &'a str,
    reference: Option<&'a str>,
    covariates: &'a [String],
    min_count: f64,
    min_samples: usize,
    sf_type: SizeFactorMethod,
    surrogate_variables: usize,
    annotation: Option<&'a str>,
    id_column: &'a str,
    symbol_column: &'a str,
    alpha: f64,
    lfc_cutoff: f64,
    output: &'a str,
    volcano: Option<&'a str>,
}

impl DeArgs<'_> {
    fn run(&self) -> Result<()> {
        let thresholds = DegThresholds::new(self.alpha, self.lfc_cutoff)?;

        info!("Loading count matrix from: {}", self.counts);
        let counts = read_count_matrix(self.counts)?;
        info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());
        let counts = counts.filter_low_counts(self.min_count, self.min_samples)?;
        info!(
            "  {} genes with >= {} counts in >= {} samples",
            counts.n_genes(),
            self.min_count,
            self.min_samples
        );

        info!("Loading metadata from: {}", self.metadata);
        let metadata = read_metadata(self.metadata)?;

        let mut dataset = ExpressionDataSet::new(counts, metadata, self.status)?;
        if let Some(reference) = self.reference {
            dataset.set_reference_level(reference)?;
        }
        if !self.covariates.is_empty() {
            dataset.set_extra_covariates(self.covariates.to_vec())?;
        }

        info!("Estimating size factors ({:?})...", self.sf_type);
        estimate_size_factors(&mut dataset, self.sf_type)?;

        if self.surrogate_variables > 0 {
            estimate_surrogates(
                &mut dataset,
                &ResidualPcaEstimator {
                    n_sv: self.surrogate_variables,
                },
            )?;
        }

        info!("Estimating dispersions...");
        estimate_dispersions(&mut dataset, &DispersionParams::default())?;
        info!("Fitting GLM...");
        fit_model(&mut dataset, &GlmFitParams::default())?;

        info!("Wald test for {} vs {}...", self.numerator, self.denominator);
        let mut result = extract_contrast(&dataset, self.numerator, self.denominator)?;
        if let Some(path) = self.annotation {
            let annotation = GeneAnnotation::from_path(path, self.id_column, self.symbol_column)?;
            result = annotation.annotate(&result);
        }
        info!("{}", result.summary(&thresholds));

        write_contrast_result(self.output, &result)?;
        info!("Results written to: {}", self.output);

        if let Some(path) = self.volcano {
            volcano_plot(path, &result, &thresholds)?;
            info!("Volcano plot written to: {}", path);
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_enrich(
    results_path: &str,
    gmt_paths: &[String],
    method: EnrichMethod,
    alpha: f64,
    lfc_cutoff: f64,
    ora: OraParams,
    gsea: GseaParams,
    output_dir: &str,
    no_plots: bool,
) -> Result<()> {
    let thresholds = DegThresholds::new(alpha, lfc_cutoff)?;

    info!("Loading results from: {}", results_path);
    let result = read_contrast_result(results_path)?;

    let mut sets = GeneSetCollection::new();
    for path in gmt_paths {
        info!("Loading gene sets from: {}", path);
        sets = sets.merge(GeneSetCollection::read_gmt(path)?)?;
    }
    info!("  {} gene sets", sets.len());

    let mut methods: Vec<Box<dyn EnrichmentMethod>> = Vec::new();
    if method.runs_ora() {
        methods.push(Box::new(OverRepresentation {
            thresholds,
            params: ora,
        }));
    }
    if method.runs_gsea() {
        methods.push(Box::new(PrerankedGsea { params: gsea }));
    }

    let output_dir = Path::new(output_dir);
    fs::create_dir_all(output_dir)?;
    for m in &methods {
        for enrichment in m.enrich(&result, &sets)? {
            let label = enrichment.label();
            let significant = enrichment.significant(alpha).len();
            info!("{}: {} terms, {} significant", label, enrichment.terms.len(), significant);
            write_records(output_dir.join(format!("{}.csv", label)), &enrichment.terms)?;
            if !no_plots && !enrichment.terms.is_empty() {
                enrichment_bar_plot(output_dir.join(format!("{}.svg", label)), &enrichment, 20)?;
            }
        }
    }
    info!("Enrichment written to: {}", output_dir.display());
    Ok(())
}

fn run_common(results_paths: &[String], alpha: f64, lfc_cutoff: f64, output: &str) -> Result<()> {
    let thresholds = DegThresholds::new(alpha, lfc_cutoff)?;
    let results = results_paths
        .iter()
        .map(|path| {
            info!("Loading results from: {}", path);
            read_contrast_result(path)
        })
        .collect::<Result<Vec<_>>>()?;

    let common = common_degs(&results, &thresholds)?;
    info!("{} genes are DEGs in all {} tables", common.len(), results.len());
    write_common_degs(output, &common)?;
    info!("Common DEGs written to: {}", output);
    Ok(())
}
