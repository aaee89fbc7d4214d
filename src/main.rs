//! LeafGuard CLI
//!
//! Train the two-phase classifier, evaluate it on the validation split,
//! classify single images and inspect the dataset.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use leafguard::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use leafguard::dataset::burn_dataset::LeafImageDataset;
use leafguard::dataset::loader::{DatasetSplit, LeafDataset};
use leafguard::inference::evaluate::evaluate;
use leafguard::inference::predictor::Predictor;
use leafguard::model::artifact::{ArtifactPaths, ModelArtifact, DEFAULT_MODEL_NAME};
use leafguard::training::config::{BackbonePreset, TrainingConfig, DEFAULT_DATA_DIR};
use leafguard::training::run_training;
use leafguard::utils::logging::{init_logging, LogConfig};

/// LeafGuard plant disease classifier
///
/// Transfer learning on a MobileNetV2 backbone with the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "leafguard")]
#[command(version)]
#[command(about = "Plant disease classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the classifier: frozen-backbone head phase, then fine-tuning
    Train {
        /// JSON training config; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset directory holding the train/ and valid/ splits
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Directory for the model artifact, labels and history
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        model_name: Option<String>,

        /// Epochs for the head phase
        #[arg(long)]
        head_epochs: Option<usize>,

        #[arg(long)]
        head_lr: Option<f64>,

        /// Epochs for the fine-tuning phase
        #[arg(long)]
        fine_tune_epochs: Option<usize>,

        #[arg(long)]
        fine_tune_lr: Option<f64>,

        /// Backbone units unfrozen during fine-tuning
        #[arg(long)]
        fine_tune_layers: Option<usize>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Early-stopping patience (epochs)
        #[arg(long)]
        patience: Option<usize>,

        /// Pretrained backbone record (.mpk)
        #[arg(long)]
        backbone_weights: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,

        /// Cap the number of training images
        #[arg(long)]
        max_samples: Option<usize>,

        /// Use the small test backbone instead of MobileNetV2
        #[arg(long, default_value = "false")]
        tiny: bool,

        /// Disable training-time augmentation
        #[arg(long, default_value = "false")]
        no_augmentation: bool,

        /// Write the effective config to this path before training
        #[arg(long)]
        save_config: Option<PathBuf>,
    },

    /// Report loss and accuracy of a saved model on a dataset split
    Evaluate {
        #[arg(short, long, default_value = "models")]
        model_dir: PathBuf,

        #[arg(long, default_value = DEFAULT_MODEL_NAME)]
        model_name: String,

        #[arg(short, long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,

        /// Split subdirectory to evaluate
        #[arg(short, long, default_value = "valid")]
        split: String,

        #[arg(short, long, default_value = "32")]
        batch_size: usize,
    },

    /// Classify an image, or every image in a directory
    Predict {
        /// Image file or directory
        input: PathBuf,

        #[arg(short, long, default_value = "models")]
        model_dir: PathBuf,

        #[arg(long, default_value = DEFAULT_MODEL_NAME)]
        model_name: String,

        /// Number of ranked classes to show
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// Print predictions as JSON lines
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Show per-class image counts for both splits
    Stats {
        #[arg(short, long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,

        #[arg(long, default_value = "train")]
        train_subdir: String,

        #[arg(long, default_value = "valid")]
        valid_subdir: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&LogConfig::from_flags(cli.verbose, cli.quiet));

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            data_dir,
            output_dir,
            model_name,
            head_epochs,
            head_lr,
            fine_tune_epochs,
            fine_tune_lr,
            fine_tune_layers,
            batch_size,
            patience,
            backbone_weights,
            seed,
            max_samples,
            tiny,
            no_augmentation,
            save_config,
        } => {
            let mut cfg = match config {
                Some(path) => TrainingConfig::load(&path)
                    .with_context(|| format!("failed to read training config {:?}", path))?,
                None => TrainingConfig::default(),
            };

            if let Some(v) = data_dir {
                cfg.data_dir = v;
            }
            if let Some(v) = output_dir {
                cfg.output_dir = v;
            }
            if let Some(v) = model_name {
                cfg.model_name = v;
            }
            if let Some(v) = head_epochs {
                cfg.head_epochs = v;
            }
            if let Some(v) = head_lr {
                cfg.head_learning_rate = v;
            }
            if let Some(v) = fine_tune_epochs {
                cfg.fine_tune_epochs = v;
            }
            if let Some(v) = fine_tune_lr {
                cfg.fine_tune_learning_rate = v;
            }
            if let Some(v) = fine_tune_layers {
                cfg.fine_tune_layers = v;
            }
            if let Some(v) = batch_size {
                cfg.batch_size = v;
            }
            if let Some(v) = patience {
                cfg.early_stopping_patience = v;
            }
            if backbone_weights.is_some() {
                cfg.backbone_weights = backbone_weights;
            }
            if let Some(v) = seed {
                cfg.seed = v;
            }
            if max_samples.is_some() {
                cfg.max_train_samples = max_samples;
            }
            if tiny {
                cfg.backbone = BackbonePreset::Tiny;
            }
            if no_augmentation {
                cfg.augmentation = leafguard::dataset::AugmentationConfig::none();
            }

            if let Some(path) = save_config {
                cfg.save(&path)?;
                info!("Training config written to {:?}", path);
            }

            cmd_train(&cfg)?;
        }

        Commands::Evaluate {
            model_dir,
            model_name,
            data_dir,
            split,
            batch_size,
        } => {
            cmd_evaluate(&model_dir, &model_name, &data_dir, &split, batch_size)?;
        }

        Commands::Predict {
            input,
            model_dir,
            model_name,
            top_k,
            json,
        } => {
            cmd_predict(&input, &model_dir, &model_name, top_k, json)?;
        }

        Commands::Stats {
            data_dir,
            train_subdir,
            valid_subdir,
        } => {
            cmd_stats(&data_dir, &train_subdir, &valid_subdir)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════╗
 ║   🌿 LeafGuard                                       ║
 ║   Plant Disease Classification with Burn + Rust      ║
 ╚══════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_train(config: &TrainingConfig) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  📁 Data:       {:?}", config.data_dir);
    println!("  💾 Output:     {:?}", config.output_dir);
    println!(
        "  🔁 Head:       {} epochs @ lr {:e}",
        config.head_epochs, config.head_learning_rate
    );
    println!(
        "  🔧 Fine-tune:  {} epochs @ lr {:e}, {} layers",
        config.fine_tune_epochs, config.fine_tune_learning_rate, config.fine_tune_layers
    );
    println!("  🖥️  Backend:    {}", backend_name());
    println!();

    let device = default_device();
    run_training::<TrainingBackend>(config, &device)?;
    Ok(())
}

fn cmd_evaluate(
    model_dir: &Path,
    model_name: &str,
    data_dir: &Path,
    split: &str,
    batch_size: usize,
) -> Result<()> {
    let device = default_device();
    let paths = ArtifactPaths::new(model_dir, model_name);

    println!("{}", "Loading model...".cyan());
    let artifact = ModelArtifact::<DefaultBackend>::load(&paths, &device)?;
    let image_size = artifact.input_size();

    // Index the split with the model's own vocabulary so class indices line up.
    let split_dir = data_dir.join(split);
    let split = DatasetSplit::scan(split, &split_dir, &artifact.vocabulary)?;
    if split.is_empty() {
        bail!("no images found under {:?}", split_dir);
    }
    info!("Evaluating on {} images from {:?}", split.len(), split_dir);

    let dataset = LeafImageDataset::from_split(&split, image_size);
    let report = evaluate(&artifact.model, &dataset, batch_size, &device, true)?;
    report.print(Some(&artifact.vocabulary));
    Ok(())
}

fn cmd_predict(input: &Path, model_dir: &Path, model_name: &str, top_k: usize, json: bool) -> Result<()> {
    if !input.exists() {
        bail!("input path not found: {:?}", input);
    }

    let device = default_device();
    let predictor = Predictor::<DefaultBackend>::load(&ArtifactPaths::new(model_dir, model_name), device)?;

    let results = if input.is_dir() {
        predictor.predict_dir(input)
    } else {
        vec![(input.to_path_buf(), predictor.predict_path(input))]
    };
    if results.is_empty() {
        bail!("no images found under {:?}", input);
    }

    for (path, result) in results {
        let prediction = match result {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{} {:?}: {}", "Skipped".yellow(), path, e);
                continue;
            }
        };

        if json {
            println!(
                "{}",
                serde_json::json!({
                    "path": path,
                    "predicted_class": prediction.label,
                    "confidence": prediction.confidence,
                })
            );
            continue;
        }

        println!("📷 {}", path.display());
        println!("  Predicted:  {}", prediction.label.green().bold());
        println!("  Confidence: {:.1}%", prediction.confidence * 100.0);
        println!("  Time:       {:.2}ms", prediction.inference_time_ms);
        println!("  Top-{}:", top_k);
        for (rank, (idx, prob)) in prediction.top_k(top_k).into_iter().enumerate() {
            let name = predictor.vocabulary().get(idx).unwrap_or("Unknown");
            println!("    {}. {} ({:.1}%)", rank + 1, name, prob * 100.0);
        }
        println!();
    }

    Ok(())
}

fn cmd_stats(data_dir: &Path, train_subdir: &str, valid_subdir: &str) -> Result<()> {
    info!("Computing dataset statistics for: {:?}", data_dir);

    if !data_dir.exists() {
        println!("{} Dataset directory not found: {:?}", "Error:".red(), data_dir);
        println!();
        println!("Expected structure:");
        println!("  {}/", data_dir.display());
        println!("  ├── {}/", train_subdir);
        println!("  │   ├── Apple___Apple_scab/");
        println!("  │   └── ...");
        println!("  └── {}/", valid_subdir);
        println!("      └── ...");
        return Ok(());
    }

    let dataset = LeafDataset::open(data_dir, train_subdir, valid_subdir)?;
    dataset.stats().print();
    Ok(())
}
