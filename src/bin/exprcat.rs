use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use expression_catalog::app::{App, AppOptions, ContrastPath, DataSetInput, DesignInput, ProgressSink};
use expression_catalog::command_engine::CommandEngine;
use expression_catalog::config::{AnnotationSource, ConfigLoader, ResolvedConfig};
use expression_catalog::db::open_database;
use expression_catalog::design::SampleGroups;
use expression_catalog::domain::{DataSetKind, EntityName, TaxonId};
use expression_catalog::engine::{EnrichmentEngine, StatisticalEngine, UnconfiguredEngine};
use expression_catalog::error::{CatalogError, ErrorKind};
use expression_catalog::output::{JsonOutput, LogSink};
use expression_catalog::providers::{AnnotationProvider, BioMartClient, LocalMart};
use expression_catalog::store::Store;
use expression_catalog::table::TextTable;

type CatalogApp = App<
    Box<dyn AnnotationProvider>,
    Box<dyn StatisticalEngine>,
    Box<dyn EnrichmentEngine>,
>;

#[derive(Parser)]
#[command(name = "exprcat")]
#[command(about = "Catalog of gene-expression studies and their derived analyses")]
#[command(version, author)]
struct Cli {
    /// Path to expression-catalog.json.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Report progress through the log instead of staying silent.
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Admitted species and their gene catalogs")]
    Species(SpeciesArgs),
    #[command(about = "Expression data sets")]
    Dataset(DatasetArgs),
    #[command(about = "Experimental designs of a data set")]
    Design(DesignArgs),
    #[command(about = "Contrasts of a design")]
    Contrast(ContrastArgs),
    #[command(about = "Differential-expression methods")]
    Method(MethodArgs),
    #[command(about = "Differential-expression models and their results")]
    Model(ModelArgs),
    #[command(about = "Gene-set collections (GMT files)")]
    Gmt(GmtArgs),
    #[command(name = "gse-method", about = "Gene-set enrichment methods")]
    GseMethod(GseMethodArgs),
    #[command(about = "Gene-set enrichment results")]
    Gse(GseArgs),
}

#[derive(Args)]
struct SpeciesArgs {
    #[command(subcommand)]
    command: SpeciesCommand,
}

#[derive(Subcommand)]
enum SpeciesCommand {
    List,
    Add {
        #[arg(long)]
        taxon: TaxonId,
        /// Annotation data set, e.g. mmusculus_gene_ensembl. Optional for human.
        #[arg(long)]
        dataset: Option<String>,
    },
    Remove {
        #[arg(long)]
        taxon: TaxonId,
    },
}

#[derive(Args)]
struct DatasetArgs {
    #[command(subcommand)]
    command: DatasetCommand,
}

#[derive(Subcommand)]
enum DatasetCommand {
    List,
    Add {
        /// Expression matrix in GCT format, optionally gzip-compressed.
        #[arg(long)]
        exprs: Utf8PathBuf,
        /// Phenotype table; the first column holds sample names.
        #[arg(long)]
        pheno: Option<Utf8PathBuf>,
        #[arg(long)]
        name: Option<EntityName>,
        #[arg(long)]
        taxon: TaxonId,
        /// Provider attribute the feature names are drawn from, e.g. affy_mouse430_2.
        #[arg(long)]
        symbol_type: String,
        /// microarray[:rma|mas5] or rnaseq[:counts|rpkm].
        #[arg(long)]
        kind: DataSetKind,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        xref: Option<String>,
    },
    Features {
        name: String,
    },
    Remove {
        name: String,
    },
}

#[derive(Args)]
struct DesignArgs {
    #[command(subcommand)]
    command: DesignCommand,
}

#[derive(Subcommand)]
enum DesignCommand {
    List {
        data_set: String,
    },
    Add {
        data_set: String,
        name: EntityName,
        /// Tab-separated design matrix.
        #[arg(long)]
        matrix: Utf8PathBuf,
        /// The matrix has no leading sample-name column.
        #[arg(long)]
        no_row_labels: bool,
        /// Explicit sample groups, one per sample.
        #[arg(long, value_delimiter = ',', conflicts_with = "pheno_column")]
        groups: Option<Vec<String>>,
        /// Phenotype column holding the sample groups.
        #[arg(long)]
        pheno_column: Option<String>,
        #[arg(long, value_delimiter = ',')]
        levels: Option<Vec<String>>,
        #[arg(long)]
        description: Option<String>,
    },
    Remove {
        data_set: String,
        name: String,
    },
}

#[derive(Args)]
struct ContrastArgs {
    #[command(subcommand)]
    command: ContrastCommand,
}

#[derive(Subcommand)]
enum ContrastCommand {
    List {
        data_set: String,
        design: String,
    },
    Add {
        data_set: String,
        design: String,
        name: EntityName,
        /// Tab-separated contrast matrix, one row per design column.
        #[arg(long)]
        matrix: Utf8PathBuf,
        #[arg(long)]
        no_row_labels: bool,
        #[arg(long)]
        description: Option<String>,
    },
    Remove {
        data_set: String,
        design: String,
        name: String,
    },
}

#[derive(Args)]
struct MethodArgs {
    #[command(subcommand)]
    command: MethodCommand,
}

#[derive(Subcommand)]
enum MethodCommand {
    List,
    Add {
        name: EntityName,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        method_version: Option<String>,
    },
    Remove {
        name: String,
    },
}

#[derive(Args, Clone)]
struct ContrastTarget {
    data_set: String,
    design: String,
    contrast: String,
}

impl ContrastTarget {
    fn path(&self) -> ContrastPath<'_> {
        ContrastPath {
            data_set: &self.data_set,
            design: &self.design,
            contrast: &self.contrast,
        }
    }
}

#[derive(Args)]
struct ModelArgs {
    #[command(subcommand)]
    command: ModelCommand,
}

#[derive(Subcommand)]
enum ModelCommand {
    List,
    Run {
        #[command(flatten)]
        target: ContrastTarget,
        method: String,
    },
    Results {
        #[command(flatten)]
        target: ContrastTarget,
        method: String,
    },
    Remove {
        #[command(flatten)]
        target: ContrastTarget,
        method: String,
    },
}

#[derive(Args)]
struct GmtArgs {
    #[command(subcommand)]
    command: GmtCommand,
}

#[derive(Subcommand)]
enum GmtCommand {
    List,
    Add {
        category: EntityName,
        file: Utf8PathBuf,
        #[arg(long)]
        taxon: TaxonId,
        #[arg(long)]
        description: Option<String>,
    },
    /// Gene indices of one gene set.
    Members {
        category: String,
        gene_set: String,
    },
    Remove {
        category: String,
    },
}

#[derive(Args)]
struct GseMethodArgs {
    #[command(subcommand)]
    command: GseMethodCommand,
}

#[derive(Subcommand)]
enum GseMethodCommand {
    List,
    Add {
        dge_method: String,
        name: EntityName,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        method_version: Option<String>,
    },
    Remove {
        dge_method: String,
        name: String,
    },
}

#[derive(Args)]
struct GseArgs {
    #[command(subcommand)]
    command: GseCommand,
}

#[derive(Subcommand)]
enum GseCommand {
    Run {
        #[command(flatten)]
        target: ContrastTarget,
        dge_method: String,
        gse_method: String,
        /// Restrict to these gene-set categories; all loaded categories by default.
        #[arg(long = "category")]
        categories: Vec<String>,
    },
    Results {
        #[command(flatten)]
        target: ContrastTarget,
        dge_method: String,
        gse_method: String,
    },
    Remove {
        #[command(flatten)]
        target: ContrastTarget,
        dge_method: String,
        gse_method: String,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CatalogError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CatalogError) -> u8 {
    match error.kind() {
        ErrorKind::NotFound => 2,
        ErrorKind::Conflict => 3,
        ErrorKind::Precondition | ErrorKind::Validation => 4,
        ErrorKind::External => 5,
        ErrorKind::Storage => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = build_app(&config)?;
    let sink: &dyn ProgressSink = if cli.progress { &LogSink } else { &JsonOutput };

    match cli.command {
        Commands::Species(args) => run_species(&app, args.command, sink),
        Commands::Dataset(args) => run_dataset(&app, args.command, sink),
        Commands::Design(args) => run_design(&app, args.command),
        Commands::Contrast(args) => run_contrast(&app, args.command),
        Commands::Method(args) => run_method(&app, args.command),
        Commands::Model(args) => run_model(&app, args.command, sink),
        Commands::Gmt(args) => run_gmt(&app, args.command, sink),
        Commands::GseMethod(args) => run_gse_method(&app, args.command),
        Commands::Gse(args) => run_gse(&app, args.command, sink),
    }
}

fn build_app(config: &ResolvedConfig) -> miette::Result<CatalogApp> {
    let provider: Box<dyn AnnotationProvider> = match &config.annotation {
        AnnotationSource::BioMart { url } => Box::new(BioMartClient::new(url)?),
        AnnotationSource::Local { path } => Box::new(LocalMart::from_dir(path)?),
    };
    let engine: Box<dyn StatisticalEngine> = match &config.engine {
        Some(entry) => Box::new(CommandEngine::from_entry(entry)),
        None => Box::new(UnconfiguredEngine),
    };
    let gse_engine: Box<dyn EnrichmentEngine> = match &config.gse_engine {
        Some(entry) => Box::new(CommandEngine::from_entry(entry)),
        None => Box::new(UnconfiguredEngine),
    };
    let store = Store::new(config.working_dir.clone());
    store.ensure_root()?;
    let conn = open_database(&config.database)?;
    Ok(App::new(
        conn,
        store,
        provider,
        engine,
        gse_engine,
        AppOptions::from_config(config),
    ))
}

fn print<T: serde::Serialize>(value: &T) -> miette::Result<()> {
    JsonOutput::print(value).into_diagnostic()
}

fn run_species(app: &CatalogApp, command: SpeciesCommand, sink: &dyn ProgressSink) -> miette::Result<()> {
    match command {
        SpeciesCommand::List => print(&app.list_species()?),
        SpeciesCommand::Add { taxon, dataset } => {
            print(&app.admit_species(dataset.as_deref(), taxon, sink)?)
        }
        SpeciesCommand::Remove { taxon } => print(&app.remove_species(taxon)?),
    }
}

fn run_dataset(app: &CatalogApp, command: DatasetCommand, sink: &dyn ProgressSink) -> miette::Result<()> {
    match command {
        DatasetCommand::List => print(&app.list_datasets()?),
        DatasetCommand::Add {
            exprs,
            pheno,
            name,
            taxon,
            symbol_type,
            kind,
            description,
            xref,
        } => {
            let input = DataSetInput {
                exprs,
                pheno,
                name,
                taxon_id: taxon,
                symbol_type,
                kind,
                description,
                xref,
            };
            print(&app.create_dataset(input, sink)?)
        }
        DatasetCommand::Features { name } => print(&app.get_features(&name)?),
        DatasetCommand::Remove { name } => print(&app.remove_dataset(&name)?),
    }
}

fn run_design(app: &CatalogApp, command: DesignCommand) -> miette::Result<()> {
    match command {
        DesignCommand::List { data_set } => print(&app.list_designs(&data_set)?),
        DesignCommand::Add {
            data_set,
            name,
            matrix,
            no_row_labels,
            groups,
            pheno_column,
            levels,
            description,
        } => {
            let sample_groups = match (groups, pheno_column) {
                (Some(groups), _) => SampleGroups::Explicit(groups),
                (None, Some(column)) => SampleGroups::PhenoColumn(column),
                (None, None) => SampleGroups::FromDesign,
            };
            let input = DesignInput {
                table: TextTable::from_tsv_path(&matrix, !no_row_labels)?,
                sample_groups,
                levels,
                description,
            };
            print(&app.create_design(&data_set, &name, input)?)
        }
        DesignCommand::Remove { data_set, name } => print(&app.remove_design(&data_set, &name)?),
    }
}

fn run_contrast(app: &CatalogApp, command: ContrastCommand) -> miette::Result<()> {
    match command {
        ContrastCommand::List { data_set, design } => print(&app.list_contrasts(&data_set, &design)?),
        ContrastCommand::Add {
            data_set,
            design,
            name,
            matrix,
            no_row_labels,
            description,
        } => {
            let table = TextTable::from_tsv_path(&matrix, !no_row_labels)?;
            print(&app.create_contrast(&data_set, &design, &name, &table, description.as_deref())?)
        }
        ContrastCommand::Remove {
            data_set,
            design,
            name,
        } => print(&app.remove_contrast(ContrastPath {
            data_set: &data_set,
            design: &design,
            contrast: &name,
        })?),
    }
}

fn run_method(app: &CatalogApp, command: MethodCommand) -> miette::Result<()> {
    match command {
        MethodCommand::List => print(&app.list_methods()?),
        MethodCommand::Add {
            name,
            description,
            method_version,
        } => print(&app.add_method(&name, description.as_deref(), method_version.as_deref())?),
        MethodCommand::Remove { name } => print(&app.remove_method(&name)?),
    }
}

fn run_model(app: &CatalogApp, command: ModelCommand, sink: &dyn ProgressSink) -> miette::Result<()> {
    match command {
        ModelCommand::List => print(&app.list_models()?),
        ModelCommand::Run { target, method } => print(&app.run_analysis(target.path(), &method, sink)?),
        ModelCommand::Results { target, method } => print(&app.get_results(target.path(), &method)?),
        ModelCommand::Remove { target, method } => print(&app.remove_model(target.path(), &method)?),
    }
}

fn run_gmt(app: &CatalogApp, command: GmtCommand, sink: &dyn ProgressSink) -> miette::Result<()> {
    match command {
        GmtCommand::List => print(&app.list_gmt()?),
        GmtCommand::Add {
            category,
            file,
            taxon,
            description,
        } => print(&app.add_gmt(&category, &file, taxon, description.as_deref(), sink)?),
        GmtCommand::Members { category, gene_set } => {
            print(&app.gene_set_members(&category, &gene_set)?)
        }
        GmtCommand::Remove { category } => print(&app.remove_gmt(&category)?),
    }
}

fn run_gse_method(app: &CatalogApp, command: GseMethodCommand) -> miette::Result<()> {
    match command {
        GseMethodCommand::List => print(&app.list_gse_methods()?),
        GseMethodCommand::Add {
            dge_method,
            name,
            description,
            method_version,
        } => print(&app.add_gse_method(
            &dge_method,
            &name,
            description.as_deref(),
            method_version.as_deref(),
        )?),
        GseMethodCommand::Remove { dge_method, name } => {
            print(&app.remove_gse_method(&dge_method, &name)?)
        }
    }
}

fn run_gse(app: &CatalogApp, command: GseCommand, sink: &dyn ProgressSink) -> miette::Result<()> {
    match command {
        GseCommand::Run {
            target,
            dge_method,
            gse_method,
            categories,
        } => {
            let categories = (!categories.is_empty()).then_some(categories.as_slice());
            print(&app.run_gse(target.path(), &dge_method, &gse_method, categories, sink)?)
        }
        GseCommand::Results {
            target,
            dge_method,
            gse_method,
        } => print(&app.get_gse_results(target.path(), &dge_method, &gse_method)?),
        GseCommand::Remove {
            target,
            dge_method,
            gse_method,
        } => print(&app.remove_gse(target.path(), &dge_method, &gse_method)?),
    }
}
