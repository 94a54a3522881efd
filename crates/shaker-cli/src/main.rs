use clap::{value_parser, Arg, Command, ValueHint};
use shaker_cli::input::Input;
use shaker_cli::runner::Runner;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("SHAKER_LOG", "error,shaker=info"))
        .init();

    let matches = Command::new("shaker")
        .version(clap::crate_version!())
        .about("Target-decoy validation, PTM localization and protein inference of proteomics identifications")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("project")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the identification project (JSON file). Overrides the \
                     project specified in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where validation results will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("fdr")
                .long("fdr")
                .value_parser(value_parser!(f64))
                .help("False discovery rate (%) applied at the PSM, peptide and protein levels")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of threads used to map peptides to proteins (default = # of CPUs)")
                .value_hint(ValueHint::Other),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let input = Input::from_arguments(matches)?;

    let runner = input.build().and_then(Runner::new)?;

    runner.run()?;

    Ok(())
}
