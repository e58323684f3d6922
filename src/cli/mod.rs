//! Command-line interface for rust_degenrich

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::error::{PipelineError, Result};
use crate::normalization::SizeFactorMethod;
use crate::quant::QuantSample;

#[derive(Parser)]
#[command(name = "rust_degenrich")]
#[command(version)]
#[command(about = "Differential expression and gene set enrichment for RNA-seq")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Number of worker threads (0 = all cores)
    #[arg(short = 't', long, global = true, default_value_t = 0)]
    pub threads: usize,

    /// Print help (`--help` for examples)
    #[arg(short = 'h', long = "help", global = true, action = ArgAction::Help)]
    pub help: Option<bool>,
}

/// Subcommands the binary dispatches to clap
pub const SUBCOMMANDS: [&str; 6] = ["run", "import", "de", "enrich", "common", "help"];

/// First subcommand in `args` (program name excluded)
///
/// Skips the value following `-t`/`--threads`, so `-t 4 de ...` finds `de`.
pub fn find_subcommand(args: &[String]) -> Option<&str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-t" | "--threads" => {
                iter.next();
            }
            flag if flag.starts_with('-') => {}
            name => return SUBCOMMANDS.contains(&name).then_some(name),
        }
    }
    None
}

/// Which enrichment analyses `enrich` runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EnrichMethod {
    Ora,
    Gsea,
    Both,
}

impl EnrichMethod {
    pub fn runs_ora(self) -> bool {
        matches!(self, EnrichMethod::Ora | EnrichMethod::Both)
    }

    pub fn runs_gsea(self) -> bool {
        matches!(self, EnrichMethod::Gsea | EnrichMethod::Both)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline from a YAML config
    #[command(
        about = "Run the full pipeline from a YAML config",
        long_about = "Run the full pipeline from a YAML config\n\n\
            Imports counts (matrix or Salmon quantifications), filters low counts,\n\
            normalizes, estimates surrogate variables, fits the negative binomial\n\
            model, tests every configured contrast, finds DEGs shared by all\n\
            contrasts and runs ORA / GSEA against the configured gene sets.",
        after_long_help = "\
Examples:
  # Everything from one config file
  rust_degenrich run -c pipeline.yaml

  # Same config, different output directory and no figures
  rust_degenrich run -c pipeline.yaml -o results_v2 --no-plots"
    )]
    Run {
        /// Path to the YAML config
        #[arg(short, long,
            long_help = "Path to the YAML pipeline config.\n\
                Relative paths inside the config are resolved against its directory.")]
        config: String,

        /// Override the configured output directory
        #[arg(short, long)]
        output: Option<String>,

        /// Skip SVG figures
        #[arg(long)]
        no_plots: bool,
    },

    /// Build a gene-level count matrix from Salmon quant.sf files
    #[command(
        long_about = "Build a gene-level count matrix from Salmon quant.sf files.\n\n\
            Transcript NumReads are summed per gene using a transcript-to-gene table\n\
            and rounded to integers.",
        after_long_help = "\
Examples:
  rust_degenrich import -x tx2gene.tsv \\
    -q ctrl1=salmon/ctrl1/quant.sf -q ctrl2=salmon/ctrl2/quant.sf \\
    -q ko1=salmon/ko1/quant.sf -q ko2=salmon/ko2/quant.sf -o counts.csv"
    )]
    Import {
        /// Transcript-to-gene table
        #[arg(short = 'x', long,
            long_help = "Two-column transcript-to-gene table (CSV or TSV, auto-detected).\n\
                A header row is recognised and skipped.")]
        tx2gene: String,

        /// Sample quantification as SAMPLE=PATH
        #[arg(short, long = "quant", value_name = "SAMPLE=PATH", required = true,
            value_parser = parse_quant_sample,
            long_help = "One Salmon quant.sf per sample, given as SAMPLE=PATH.\n\
                Repeat for each sample; column order follows the arguments.")]
        quant: Vec<QuantSample>,

        /// Keep transcript version suffixes when matching
        #[arg(long)]
        keep_tx_version: bool,

        /// Output count matrix [default: counts.csv]
        #[arg(short, long, default_value = "counts.csv")]
        output: String,
    },

    /// Test one contrast and write the result table
    #[command(
        long_about = "Test one contrast and write the result table.\n\n\
            Median-of-ratios normalization, optional surrogate variables,\n\
            negative binomial GLM and Wald test with BH-adjusted p-values.",
        after_long_help = "\
Examples:
  rust_degenrich de -c counts.csv -m metadata.csv \\
    --numerator ko --denominator wt -o ko_vs_wt.csv

  # Two surrogate variables, gene symbols, and a volcano plot
  rust_degenrich de -c counts.csv -m metadata.csv --numerator ko --denominator wt \\
    --surrogate-variables 2 --annotation genes.tsv --volcano ko_vs_wt.svg"
    )]
    De {
        /// Path to count matrix CSV file
        #[arg(short, long,
            long_help = "Path to count matrix CSV file.\n\
                Format: first column = gene IDs, remaining columns = raw counts per sample.\n\
                Supports both CSV (comma) and TSV (tab) delimiters (auto-detected).")]
        counts: String,

        /// Path to sample metadata CSV file
        #[arg(short, long,
            long_help = "Path to sample metadata CSV file.\n\
                Format: first column = sample IDs (matching count matrix columns),\n\
                remaining columns = experimental variables.")]
        metadata: String,

        /// Metadata column holding the sample status [default: status]
        #[arg(short, long, default_value = "status")]
        status: String,

        /// Numerator level
        #[arg(long)]
        numerator: String,

        /// Denominator level
        #[arg(long)]
        denominator: String,

        /// Reference level for the design
        #[arg(long)]
        reference: Option<String>,

        /// Numeric metadata covariate
        #[arg(long, value_name = "VAR",
            long_help = "Numeric metadata column added to the design (e.g. RIN, age).\n\
                Can be specified multiple times: --covariate rin --covariate age")]
        covariate: Vec<String>,

        /// Minimum count a gene needs in --min-samples samples [default: 10]
        #[arg(long, default_value_t = 10.0)]
        min_count: f64,

        /// Samples that must reach --min-count [default: 2]
        #[arg(long, default_value_t = 2)]
        min_samples: usize,

        /// Size factor estimator (ratio, poscounts) [default: ratio]
        #[arg(long, default_value = "ratio")]
        sf_type: SizeFactorMethod,

        /// Number of surrogate variables [default: 0]
        #[arg(long, default_value_t = 0)]
        surrogate_variables: usize,

        /// Gene annotation table for symbols
        #[arg(long)]
        annotation: Option<String>,

        /// Annotation column with gene IDs [default: gene_id]
        #[arg(long, default_value = "gene_id")]
        id_column: String,

        /// Annotation column with symbols [default: symbol]
        #[arg(long, default_value = "symbol")]
        symbol_column: String,

        /// Adjusted p-value cutoff [default: 0.05]
        #[arg(short, long, default_value_t = 0.05)]
        alpha: f64,

        /// Absolute log2 fold change cutoff [default: 1.0]
        #[arg(long, default_value_t = 1.0)]
        lfc_cutoff: f64,

        /// Output file path [default: de_results.csv]
        #[arg(short, long, default_value = "de_results.csv")]
        output: String,

        /// Also draw a volcano plot to this SVG
        #[arg(long)]
        volcano: Option<String>,
    },

    /// Run ORA and/or GSEA on a result table
    #[command(
        long_about = "Run ORA and/or GSEA on a result table written by `de` or `run`.\n\n\
            ORA tests up- and down-regulated DEGs separately against the tested genes.\n\
            GSEA ranks all tested genes by the Wald statistic.",
        after_long_help = "\
Examples:
  rust_degenrich enrich -r ko_vs_wt.csv -g hallmark.gmt -o enrichment

  rust_degenrich enrich -r ko_vs_wt.csv -g hallmark.gmt -g kegg.gmt \\
    --method gsea --permutations 10000 --seed 7"
    )]
    Enrich {
        /// Contrast result table
        #[arg(short, long)]
        results: String,

        /// GMT gene set file (repeatable)
        #[arg(short, long, required = true)]
        gmt: Vec<String>,

        /// Analyses to run [default: both]
        #[arg(long, value_enum, default_value_t = EnrichMethod::Both)]
        method: EnrichMethod,

        /// DEG adjusted p-value cutoff [default: 0.05]
        #[arg(short, long, default_value_t = 0.05)]
        alpha: f64,

        /// DEG absolute log2 fold change cutoff [default: 1.0]
        #[arg(long, default_value_t = 1.0)]
        lfc_cutoff: f64,

        /// Smallest gene set tested [default: 10]
        #[arg(long, default_value_t = 10)]
        min_size: usize,

        /// Largest gene set tested [default: 500]
        #[arg(long, default_value_t = 500)]
        max_size: usize,

        /// GSEA permutations [default: 1000]
        #[arg(long, default_value_t = 1000)]
        permutations: usize,

        /// GSEA random seed [default: 42]
        #[arg(long, default_value_t = 42)]
        seed: u32,

        /// Output directory [default: enrichment]
        #[arg(short, long, default_value = "enrichment")]
        output: String,

        /// Skip SVG figures
        #[arg(long)]
        no_plots: bool,
    },

    /// Genes that are DEGs in every given result table
    #[command(
        after_long_help = "\
Examples:
  rust_degenrich common -r ko1_vs_wt.csv -r ko2_vs_wt.csv -o common_degs.csv"
    )]
    Common {
        /// Contrast result table (repeat for each contrast)
        #[arg(short, long, required = true)]
        results: Vec<String>,

        /// Adjusted p-value cutoff [default: 0.05]
        #[arg(short, long, default_value_t = 0.05)]
        alpha: f64,

        /// Absolute log2 fold change cutoff [default: 1.0]
        #[arg(long, default_value_t = 1.0)]
        lfc_cutoff: f64,

        /// Output file path [default: common_degs.csv]
        #[arg(short, long, default_value = "common_degs.csv")]
        output: String,
    },
}

/// Parse a `SAMPLE=PATH` quantification argument
pub fn parse_quant_sample(arg: &str) -> Result<QuantSample> {
    match arg.split_once('=') {
        Some((sample, path)) if !sample.is_empty() && !path.is_empty() => Ok(QuantSample {
            sample: sample.to_string(),
            path: path.into(),
        }),
        _ => Err(PipelineError::InvalidInput {
            reason: format!("expected SAMPLE=PATH, got '{}'", arg),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use std::path::PathBuf;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_find_subcommand() {
        assert_eq!(find_subcommand(&args(&["de", "-c", "x.csv"])), Some("de"));
        assert_eq!(find_subcommand(&args(&["-t", "4", "de", "-c", "x.csv"])), Some("de"));
        assert_eq!(find_subcommand(&args(&["--threads", "4", "-v", "run", "-c", "p.yaml"])), Some("run"));
        assert_eq!(find_subcommand(&args(&["-t4", "common"])), Some("common"));
        assert_eq!(find_subcommand(&args(&["--threads=2", "enrich"])), Some("enrich"));
        assert_eq!(find_subcommand(&args(&["-t", "4"])), None);
        assert_eq!(find_subcommand(&args(&["-v", "bogus"])), None);
        assert_eq!(find_subcommand(&args(&[])), None);
    }

    #[test]
    fn test_threads_before_and_after_subcommand() {
        for argv in [
            vec!["rust_degenrich", "-t", "4", "common", "-r", "a.csv"],
            vec!["rust_degenrich", "common", "-r", "a.csv", "-t", "4"],
            vec!["rust_degenrich", "--threads", "4", "common", "-r", "a.csv"],
        ] {
            let cli = Cli::try_parse_from(argv.clone()).unwrap();
            assert_eq!(cli.threads, 4, "{:?}", argv);
            assert!(matches!(cli.command, Some(Commands::Common { .. })));
        }
        let cli = Cli::try_parse_from(["rust_degenrich", "common", "-r", "a.csv"]).unwrap();
        assert_eq!(cli.threads, 0);
    }

    #[test]
    fn test_subcommand_help_flag() {
        for sub in ["run", "import", "de", "enrich", "common"] {
            let err = Cli::try_parse_from(["rust_degenrich", sub, "-h"]).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::DisplayHelp, "{}", sub);
            let err = Cli::try_parse_from(["rust_degenrich", sub, "--help"]).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::DisplayHelp, "{}", sub);
        }
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from(["rust_degenrich", "run", "-c", "pipeline.yaml", "--no-plots"]).unwrap();
        match cli.command {
            Some(Commands::Run {
                config,
                output,
                no_plots,
            }) => {
                assert_eq!(config, "pipeline.yaml");
                assert_eq!(output, None);
                assert!(no_plots);
            }
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["rust_degenrich", "run"]).is_err());
    }

    #[test]
    fn test_parse_common_command() {
        let cli = Cli::try_parse_from([
            "rust_degenrich",
            "common",
            "-r",
            "ko1_vs_wt.csv",
            "-r",
            "ko2_vs_wt.csv",
            "--lfc-cutoff",
            "0.5",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Common {
                results,
                alpha,
                lfc_cutoff,
                output,
            }) => {
                assert_eq!(results, vec!["ko1_vs_wt.csv", "ko2_vs_wt.csv"]);
                assert_eq!(alpha, 0.05);
                assert_eq!(lfc_cutoff, 0.5);
                assert_eq!(output, "common_degs.csv");
            }
            _ => panic!("expected common"),
        }
        assert!(Cli::try_parse_from(["rust_degenrich", "common"]).is_err());
    }

    #[test]
    fn test_parse_quant_sample() {
        let q = parse_quant_sample("ko1=salmon/ko1/quant.sf").unwrap();
        assert_eq!(q.sample, "ko1");
        assert_eq!(q.path, PathBuf::from("salmon/ko1/quant.sf"));

        // only the first '=' splits
        let q = parse_quant_sample("a=dir/x=y.sf").unwrap();
        assert_eq!(q.path, PathBuf::from("dir/x=y.sf"));

        assert!(parse_quant_sample("quant.sf").is_err());
        assert!(parse_quant_sample("=quant.sf").is_err());
        assert!(parse_quant_sample("ko1=").is_err());
    }

    #[test]
    fn test_parse_de_command() {
        let cli = Cli::try_parse_from([
            "rust_degenrich",
            "de",
            "-c",
            "counts.csv",
            "-m",
            "meta.csv",
            "--numerator",
            "ko",
            "--denominator",
            "wt",
            "--sf-type",
            "poscounts",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::De {
                status,
                sf_type,
                alpha,
                output,
                ..
            }) => {
                assert_eq!(status, "status");
                assert_eq!(sf_type, SizeFactorMethod::PosCounts);
                assert_eq!(alpha, 0.05);
                assert_eq!(output, "de_results.csv");
            }
            _ => panic!("expected de"),
        }
    }

    #[test]
    fn test_parse_enrich_and_import() {
        let cli = Cli::try_parse_from([
            "rust_degenrich",
            "enrich",
            "-r",
            "res.csv",
            "-g",
            "a.gmt",
            "-g",
            "b.gmt",
            "--method",
            "ora",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Enrich { gmt, method, .. }) => {
                assert_eq!(gmt.len(), 2);
                assert!(method.runs_ora());
                assert!(!method.runs_gsea());
            }
            _ => panic!("expected enrich"),
        }

        let cli = Cli::try_parse_from(["rust_degenrich", "import", "-x", "t2g.tsv", "-q", "s1=a.sf", "-q", "s2=b.sf"])
            .unwrap();
        match cli.command {
            Some(Commands::Import { quant, .. }) => {
                let names: Vec<&str> = quant.iter().map(|q| q.sample.as_str()).collect();
                assert_eq!(names, vec!["s1", "s2"]);
            }
            _ => panic!("expected import"),
        }

        assert!(Cli::try_parse_from(["rust_degenrich", "import", "-x", "t2g.tsv", "-q", "bad"]).is_err());
    }
}
