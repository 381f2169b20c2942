use anyhow::Result;
use clap::{Arg, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use aptatrans_cli::commands::pretrain::parse_family;
use aptatrans_cli::commands::{explain, predict, pretrain, recommend, train};
use aptatrans_cli::config::{load_config, AppConfig};

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .help("Path to a JSON configuration file")
        .value_parser(clap::value_parser!(PathBuf))
        .value_hint(ValueHint::FilePath)
}

fn device_arg() -> Arg {
    Arg::new("device")
        .long("device")
        .help("Compute device (cpu, cuda, cuda:N). Overrides the configuration file.")
        .value_parser(clap::builder::NonEmptyStringValueParser::new())
        .value_hint(ValueHint::Other)
}

fn model_dir_arg() -> Arg {
    Arg::new("model_dir")
        .long("model-dir")
        .help("Directory checkpoints are read from and written to. Overrides the configuration file.")
        .value_parser(clap::value_parser!(PathBuf))
        .value_hint(ValueHint::DirPath)
}

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("APTATRANS_LOG", "error,aptatrans=info"))
        .init();

    let matches = Command::new("aptatrans")
        .version(clap::crate_version!())
        .about("Aptamer-protein interaction scoring and candidate recommendation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("pretrain")
                .about("Pretrain one encoder on masked-token and structure objectives")
                .arg(
                    Arg::new("family")
                        .help("Encoder family to pretrain")
                        .required(true)
                        .value_parser(["apta", "protein"]),
                )
                .arg(
                    Arg::new("data")
                        .short('d')
                        .long("data")
                        .help("CSV table with columns sequence,structure")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(config_arg())
                .arg(device_arg())
                .arg(model_dir_arg()),
        )
        .subcommand(
            Command::new("train")
                .about("Fine-tune the interaction scorer on labeled pairs")
                .arg(
                    Arg::new("data")
                        .short('d')
                        .long("data")
                        .help("CSV table with columns aptamer,protein,label")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(config_arg())
                .arg(device_arg())
                .arg(model_dir_arg()),
        )
        .subcommand(
            Command::new("predict")
                .about("Score one aptamer/protein pair")
                .arg(
                    Arg::new("aptamer")
                        .short('a')
                        .long("aptamer")
                        .help("Aptamer sequence (RNA or DNA letters)")
                        .required(true)
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                )
                .arg(
                    Arg::new("protein")
                        .short('p')
                        .long("protein")
                        .help("Protein sequence (one-letter amino acid codes)")
                        .required(true)
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                )
                .arg(config_arg())
                .arg(device_arg())
                .arg(model_dir_arg()),
        )
        .subcommand(
            Command::new("explain")
                .about("Extract per-position saliency for one pair")
                .arg(
                    Arg::new("aptamer")
                        .short('a')
                        .long("aptamer")
                        .required(true)
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                )
                .arg(
                    Arg::new("protein")
                        .short('p')
                        .long("protein")
                        .required(true)
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                )
                .arg(
                    Arg::new("view")
                        .long("view")
                        .help("Which axis saliency is reported for")
                        .value_parser(["aptamer", "protein", "combined"])
                        .default_value("combined"),
                )
                .arg(
                    Arg::new("top_k")
                        .short('k')
                        .long("top-k")
                        .help("Number of top positions to report")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("10"),
                )
                .arg(
                    Arg::new("output_file")
                        .short('o')
                        .long("output")
                        .help("Write the saliency JSON here instead of stdout")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(config_arg())
                .arg(device_arg())
                .arg(model_dir_arg()),
        )
        .subcommand(
            Command::new("recommend")
                .about("Search for candidate aptamers against a target protein")
                .arg(
                    Arg::new("protein")
                        .short('p')
                        .long("protein")
                        .help("Target protein sequence")
                        .required(true)
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                )
                .arg(
                    Arg::new("n_aptamers")
                        .short('n')
                        .long("n-aptamers")
                        .help("Number of candidates to produce. Overrides the configuration file.")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("depth")
                        .long("depth")
                        .help("Candidate sequence length in bases. Overrides the configuration file.")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("output_file")
                        .short('o')
                        .long("output")
                        .help("Write the candidate JSON here as well as printing the table")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(config_arg())
                .arg(device_arg())
                .arg(model_dir_arg()),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("pretrain", sub)) => {
            let config = config_with_overrides(sub)?;
            let family = parse_family(sub.get_one::<String>("family").unwrap())?;
            let data: &PathBuf = sub.get_one("data").unwrap();
            run_or_exit(pretrain::run_pretrain(&config, family, data), "Pretraining")
        }
        Some(("train", sub)) => {
            let config = config_with_overrides(sub)?;
            let data: &PathBuf = sub.get_one("data").unwrap();
            run_or_exit(train::run_train(&config, data), "Training")
        }
        Some(("predict", sub)) => {
            let config = config_with_overrides(sub)?;
            let aptamer = sub.get_one::<String>("aptamer").unwrap();
            let protein = sub.get_one::<String>("protein").unwrap();
            run_or_exit(
                predict::run_predict(&config, aptamer, protein).map(|_| ()),
                "Prediction",
            )
        }
        Some(("explain", sub)) => {
            let config = config_with_overrides(sub)?;
            let aptamer = sub.get_one::<String>("aptamer").unwrap();
            let protein = sub.get_one::<String>("protein").unwrap();
            let view = sub.get_one::<String>("view").unwrap();
            let top_k = *sub.get_one::<usize>("top_k").unwrap();
            let output = sub.get_one::<PathBuf>("output_file").map(|p| p.as_path());
            run_or_exit(
                explain::run_explain(&config, aptamer, protein, view, top_k, output),
                "Saliency extraction",
            )
        }
        Some(("recommend", sub)) => {
            let mut config = config_with_overrides(sub)?;
            if let Some(&n) = sub.get_one::<usize>("n_aptamers") {
                config.recommend.n_aptamers = n;
            }
            if let Some(&depth) = sub.get_one::<usize>("depth") {
                config.recommend.depth = depth;
            }
            let protein = sub.get_one::<String>("protein").unwrap();
            let output = sub.get_one::<PathBuf>("output_file").map(|p| p.as_path());
            run_or_exit(
                recommend::run_recommend(&config, protein, output),
                "Recommendation",
            )
        }
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn config_with_overrides(matches: &ArgMatches) -> Result<AppConfig> {
    let mut config = load_config(matches.get_one::<PathBuf>("config").map(|p| p.as_path()))?;
    if let Some(device) = matches.get_one::<String>("device") {
        config.device = device.clone();
    }
    if let Some(model_dir) = matches.get_one::<PathBuf>("model_dir") {
        config.model.model_dir = model_dir.clone();
    }
    Ok(config)
}

fn run_or_exit(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            log::error!("{what} failed: {e:#}");
            std::process::exit(1)
        }
    }
}
