//! Subcommand implementations

use anyhow::{bail, Context, Result};
use artrack_core::{
    config_signature, BuildConfig, DetectorConfig, EngineConfig, WeightScheme, DATABASE_VERSION,
};
use artrack_engine::Engine;
use artrack_vision::FeatureExtractor;
use artrack_vocab::{
    BuildEvent, ChannelSink, Database, DatabaseMetadata, TargetRecord, VocabularyBuilder,
    VocabularySection,
};
use chrono::Utc;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

fn parse_scheme(scheme: &str) -> Result<WeightScheme> {
    match scheme {
        "bm25" => Ok(WeightScheme::Bm25),
        "tfidf" => Ok(WeightScheme::TfIdf),
        other => bail!("unknown weighting scheme '{other}' (expected bm25 or tfidf)"),
    }
}

fn build_config(scheme: WeightScheme, max_features: usize) -> BuildConfig {
    BuildConfig {
        weighting: scheme,
        detector: DetectorConfig {
            max_features,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Load an image file as tightly packed Gray8
fn load_gray(path: &Path) -> Result<(Vec<u8>, u32, u32)> {
    let img = image::open(path).with_context(|| format!("reading {}", path.display()))?;
    let gray = img.to_luma8();
    let (width, height) = gray.dimensions();
    Ok((gray.into_raw(), width, height))
}

pub fn build(input: &Path, output: &Path, scheme: &str, max_features: usize) -> Result<()> {
    let scheme = parse_scheme(scheme)?;
    let config = build_config(scheme, max_features);

    // Deterministic target order: sorted file names
    let mut entries: Vec<_> = std::fs::read_dir(input)
        .with_context(|| format!("reading directory {}", input.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("png" | "jpg" | "jpeg" | "bmp")
            )
        })
        .collect();
    entries.sort();
    if entries.is_empty() {
        bail!("no reference images found in {}", input.display());
    }

    let mut extractor = FeatureExtractor::new(&config.detector, config.preprocess)?;
    let mut ids = Vec::new();
    let mut dims = Vec::new();
    let mut keypoint_sets = Vec::new();
    let mut descriptor_sets = Vec::new();

    for path in &entries {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("target")
            .to_string();
        let (gray, width, height) = load_gray(path)?;
        match extractor.extract(&gray, width as usize, height as usize) {
            Ok((kps, desc)) => {
                println!("  {id}: {} features ({width}x{height})", kps.len());
                ids.push(id);
                dims.push((width, height));
                keypoint_sets.push(kps);
                descriptor_sets.push(desc);
            }
            Err(e) => {
                tracing::warn!(target = %id, error = %e, "skipping reference image");
            }
        }
    }
    if descriptor_sets.is_empty() {
        bail!("no usable reference images");
    }

    // Run the build on a worker and narrate progress from the channel
    let (tx, rx) = crossbeam_channel::unbounded();
    let watcher = std::thread::spawn(move || {
        for event in rx {
            match event {
                BuildEvent::Started {
                    total_descriptors,
                    sampled,
                    branch_factor,
                    levels,
                } => println!(
                    "clustering {sampled}/{total_descriptors} descriptors (k={branch_factor}, L={levels})"
                ),
                BuildEvent::ClusterIteration {
                    level,
                    iteration,
                    changed,
                } => tracing::debug!(level, iteration, changed, "cluster iteration"),
                BuildEvent::Finished { vocab_size } => {
                    println!("vocabulary ready: {vocab_size} words")
                }
            }
        }
    });

    let refs: Vec<&artrack_core::Descriptors> = descriptor_sets.iter().collect();
    let builder = VocabularyBuilder::new(config.clone());
    let built = {
        let sink = ChannelSink(tx);
        builder.build(&refs, Some(&sink))?
        // Sender drops here, which ends the watcher
    };
    watcher.join().ok();

    let targets: Vec<TargetRecord> = ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| TargetRecord {
            id,
            width: dims[i].0,
            height: dims[i].1,
            keypoints: keypoint_sets[i].clone(),
            descriptors: descriptor_sets[i].clone(),
            bow: built.bows[i].clone(),
            weighted: built.weighted[i].clone(),
        })
        .collect();

    let db = Database {
        metadata: DatabaseMetadata {
            database_version: DATABASE_VERSION.to_string(),
            config_signature: config_signature(&config),
            descriptor_kind: config.detector.descriptor_kind,
            descriptor_width: config.detector.descriptor_width,
            vocab_size: built.tree.vocab_size,
            branch_factor: built.tree.branch_factor,
            levels: built.tree.levels,
            weighting: built.weighting,
            avg_dl: built.avg_dl,
            created_at: Utc::now(),
        },
        vocabulary: VocabularySection {
            tree: Database::serialize_tree(&built.tree),
            idf: built.idf.clone(),
        },
        targets,
    };
    db.save(output)?;
    println!(
        "wrote {} ({} targets, {} words)",
        output.display(),
        db.targets.len(),
        db.metadata.vocab_size
    );
    Ok(())
}

pub fn info(database: &Path) -> Result<()> {
    // Inspection skips the compatibility gate on purpose: stale databases
    // should still be explainable
    let file = File::open(database).with_context(|| format!("opening {}", database.display()))?;
    let db: Database = serde_json::from_reader(BufReader::new(file))?;

    let m = &db.metadata;
    println!("database:   {}", database.display());
    println!("schema:     {}", m.database_version);
    println!("signature:  {:#018x}", m.config_signature);
    println!(
        "vocabulary: {} words (k={}, L={}, {:?} x{} bytes)",
        m.vocab_size, m.branch_factor, m.levels, m.descriptor_kind, m.descriptor_width
    );
    println!("weighting:  {} (avg_dl {:.1})", m.weighting.as_str(), m.avg_dl);
    println!("created:    {}", m.created_at);
    println!("targets:    {}", db.targets.len());
    for t in &db.targets {
        println!(
            "  {}: {}x{}, {} features, {} distinct words",
            t.id,
            t.width,
            t.height,
            t.keypoints.len(),
            t.bow.len()
        );
    }
    Ok(())
}

pub fn query(
    database: &Path,
    image: &Path,
    scheme: &str,
    max_features: usize,
    format: &str,
) -> Result<()> {
    let scheme = parse_scheme(scheme)?;
    let config = build_config(scheme, max_features);

    let db = Database::load(database, config_signature(&config))
        .context("database rejected; rebuild it with `artrack build`")?;

    let mut engine = Engine::new(EngineConfig {
        max_features,
        use_optical_flow: false,
        ..Default::default()
    })?;
    engine.load_database(&db)?;
    engine.start_tracking();

    let (gray, width, height) = load_gray(image)?;
    let results = engine.process_frame(&gray, width as usize, height as usize, 1)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&results)?),
        _ => {
            if results.is_empty() {
                println!("no targets found");
            }
            for r in &results {
                println!(
                    "{}: confidence {:.2}, corners {:?}",
                    r.target_id,
                    r.confidence,
                    r.corners.map(|c| (c.x.round(), c.y.round()))
                );
            }
        }
    }
    Ok(())
}
