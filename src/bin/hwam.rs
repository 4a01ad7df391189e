#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hwam::aggregate::TagWeights;
use hwam::cache::{CachedEmbedder, SqliteEmbeddingCache};
use hwam::catalog::AttributeCatalog;
use hwam::config::MappingConfig;
use hwam::embedding::{Embedder, HashEmbedder, VectorTable};
use hwam::mapper::AffinityMapper;
use hwam::profile::{self, Profile};
use hwam::rank::{round_score, top_k};
use hwam::store;
use hwam::taxonomy::TaxonomyTree;

#[derive(Parser)]
#[command(name = "hwam", version, about = "Hierarchical weighted affinity mapping CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every attribute against every category and rank the results
    Map(MapArgs),
    /// Rank categories from a saved matrix
    TopK {
        #[arg(long)]
        matrix: PathBuf,
        #[arg(long)]
        taxonomy: PathBuf,
        #[arg(long, default_value_t = 10)]
        k: usize,
        #[arg(long)]
        leaf_only: bool,
        #[arg(long, default_value = " > ")]
        separator: String,
        #[arg(long, default_value_t = 6)]
        precision: u32,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print shape, ids and value range of a saved matrix
    Inspect {
        #[arg(long)]
        matrix: PathBuf,
    },
    /// Project an attribute profile (0-255 values) through a saved matrix
    ProfileFit {
        #[arg(long)]
        matrix: PathBuf,
        /// JSON object of attribute id -> 0..=255; missing attributes default to 128
        #[arg(long)]
        profile: PathBuf,
        /// Category ids to average over; if omitted, prints the ranked projection
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Category ids masked out of the ranked projection
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long)]
        k: Option<usize>,
    },
    /// Export SQLite embedding cache to JSONL
    CacheExport {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Prune SQLite embedding cache (by age and/or size)
    CachePrune {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        max_age_days: Option<u64>,
        #[arg(long)]
        max_rows: Option<usize>,
    },
}

#[derive(Args)]
struct MapArgs {
    /// Attribute catalog JSON
    #[arg(long)]
    attributes: PathBuf,
    /// Taxonomy JSON (list of {id, name, parent_id})
    #[arg(long)]
    taxonomy: PathBuf,
    /// Precomputed text -> vector JSON table
    #[arg(long, conflicts_with = "hash_dim")]
    vectors: Option<PathBuf>,
    /// Use the deterministic hash embedder with this dimension
    #[arg(long)]
    hash_dim: Option<usize>,
    /// Route embeddings through the SQLite cache
    #[arg(long)]
    cache: bool,
    #[arg(long)]
    cache_db: Option<PathBuf>,
    /// MappingConfig JSON; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON object of tag -> weight
    #[arg(long)]
    weights: Option<PathBuf>,
    /// Report output path (stdout if omitted)
    #[arg(long)]
    out: Option<PathBuf>,
    /// Persist the calibrated matrix
    #[arg(long)]
    save_matrix: Option<PathBuf>,
    /// Persist the base (uncalibrated) matrix
    #[arg(long)]
    save_base: Option<PathBuf>,

    #[arg(long)]
    alpha: Option<f32>,
    #[arg(long)]
    beta: Option<f32>,
    #[arg(long)]
    gamma: Option<f32>,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long)]
    leaf_only: bool,
    #[arg(long)]
    boost_from_parents: bool,
    #[arg(long)]
    evidence_driven_parents: bool,
    #[arg(long)]
    full_path_labels: bool,
    #[arg(long)]
    per_tag: bool,
    /// Reject taxonomies whose parent ids are missing
    #[arg(long)]
    strict: bool,
}

impl MapArgs {
    fn config(&self) -> Result<MappingConfig, Box<dyn std::error::Error>> {
        let mut cfg = match &self.config {
            Some(path) => MappingConfig::from_json_file(path)?,
            None => MappingConfig::default(),
        };
        if let Some(v) = self.alpha {
            cfg.alpha = v;
        }
        if let Some(v) = self.beta {
            cfg.beta = v;
        }
        if let Some(v) = self.gamma {
            cfg.gamma = v;
        }
        if let Some(v) = self.top_k {
            cfg.top_k = v;
        }
        cfg.leaf_only_output |= self.leaf_only;
        cfg.boost_from_parents |= self.boost_from_parents;
        cfg.evidence_driven_parents |= self.evidence_driven_parents;
        cfg.use_full_path_labels |= self.full_path_labels;
        cfg.per_tag_similarity_path |= self.per_tag;
        cfg.reject_dangling_parents |= self.strict;
        cfg.validate()?;
        Ok(cfg)
    }

    fn embedder(&self) -> Result<Box<dyn Embedder>, Box<dyn std::error::Error>> {
        let cache = if self.cache {
            let path = self
                .cache_db
                .clone()
                .unwrap_or_else(SqliteEmbeddingCache::default_path);
            Some(SqliteEmbeddingCache::new(path)?)
        } else {
            None
        };
        let embedder: Box<dyn Embedder> = match (&self.vectors, self.hash_dim, cache) {
            (Some(path), _, None) => Box::new(VectorTable::from_json_file(path)?),
            (Some(path), _, Some(cache)) => Box::new(CachedEmbedder::new(
                VectorTable::from_json_file(path)?,
                cache,
            )),
            (None, Some(dim), None) => Box::new(HashEmbedder::new(dim)),
            (None, Some(dim), Some(cache)) => {
                Box::new(CachedEmbedder::new(HashEmbedder::new(dim), cache))
            }
            (None, None, _) => return Err("map requires --vectors or --hash-dim".into()),
        };
        Ok(embedder)
    }
}

#[derive(Serialize)]
struct MatrixSummary<'a> {
    rows: usize,
    cols: usize,
    min: f32,
    max: f32,
    mean: f32,
    row_ids: &'a [String],
    col_ids: &'a [String],
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Map(args) => {
            let cfg = args.config()?;
            let catalog = AttributeCatalog::from_json_file(&args.attributes)?;
            let tree = TaxonomyTree::from_json_file(&args.taxonomy, cfg.reject_dangling_parents)?;
            let weights: Option<TagWeights> = match &args.weights {
                Some(path) => Some(read_json(path)?),
                None => None,
            };
            let embedder = args.embedder()?;

            let outcome =
                AffinityMapper::new(&catalog, &tree, embedder.as_ref()).run(&cfg, weights.as_ref())?;

            if let Some(path) = &args.save_base {
                store::save(path, &outcome.base.matrix)?;
            }
            if let Some(path) = &args.save_matrix {
                store::save(path, &outcome.calibrated)?;
            }
            emit_json(args.out.as_ref(), &outcome.report)?;
        }
        Commands::TopK {
            matrix,
            taxonomy,
            k,
            leaf_only,
            separator,
            precision,
            out,
        } => {
            if k == 0 {
                return Err("--k must be >= 1".into());
            }
            let matrix = store::load(&matrix)?;
            let tree = TaxonomyTree::from_json_file(&taxonomy, false)?;
            let rankings = top_k(&matrix, &tree, k, leaf_only, &separator)?;
            let mut results = serde_json::Map::new();
            for (id, mut ranked) in matrix.row_ids().iter().zip(rankings) {
                for r in ranked.iter_mut() {
                    r.score = round_score(r.score as f32, precision);
                }
                results.insert(id.clone(), serde_json::to_value(ranked)?);
            }
            emit_json(out.as_ref(), &results)?;
        }
        Commands::Inspect { matrix } => {
            let m = store::load(&matrix)?;
            let values = m.values();
            let (min, max, mean) = if values.is_empty() {
                (0.0, 0.0, 0.0)
            } else {
                (values.min(), values.max(), values.mean())
            };
            let summary = MatrixSummary {
                rows: m.nrows(),
                cols: m.ncols(),
                min,
                max,
                mean,
                row_ids: m.row_ids(),
                col_ids: m.col_ids(),
            };
            emit_json(None, &summary)?;
        }
        Commands::ProfileFit {
            matrix,
            profile: profile_path,
            categories,
            exclude,
            k,
        } => {
            let m = store::load(&matrix)?;
            let p: Profile = read_json(&profile_path)?;
            if categories.is_empty() {
                let ranked = profile::ranked_projection(&m, &p, &exclude, k);
                emit_json(None, &ranked)?;
            } else {
                let fit = profile::fit(&m, &p, &categories);
                info!(categories = categories.len(), fit, "profile fit");
                println!("{fit:.6}");
            }
        }
        Commands::CacheExport { db, out } => {
            let path = db.unwrap_or_else(SqliteEmbeddingCache::default_path);
            let cache = SqliteEmbeddingCache::new(path)?;
            let written = cache.export_jsonl(out)?;
            println!("exported {written} rows");
        }
        Commands::CachePrune {
            db,
            max_age_days,
            max_rows,
        } => {
            if max_age_days.is_none() && max_rows.is_none() {
                return Err("cache-prune requires --max-age-days and/or --max-rows".into());
            }
            if matches!(max_rows, Some(0)) {
                return Err("--max-rows must be >= 1".into());
            }
            let path = db.unwrap_or_else(SqliteEmbeddingCache::default_path);
            let cache = SqliteEmbeddingCache::new(path)?;
            let _lock = cache.lock_exclusive()?;
            let stats = cache.prune(max_age_days, max_rows)?;
            println!(
                "pruned {} rows; {} rows remain",
                stats.deleted, stats.remaining
            );
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}

fn emit_json<T: serde::Serialize>(
    path: Option<&PathBuf>,
    value: &T,
) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(path) => write_json(path, value)?,
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
