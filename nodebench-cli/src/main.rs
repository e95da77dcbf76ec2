use clap::Parser as _;
use color_eyre::eyre::Result;
use nodebench_cli::{commands, CliArgs, Command, Config};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let CliArgs {
        config,
        check_config_only,
        log: log_args,
        benchmark: benchmark_args,
        storage: storage_args,
        command,
    } = CliArgs::parse();
    let config =
        Config::load(&config)?.update_from_args(log_args, benchmark_args, storage_args)?;
    config.validate()?;

    #[expect(
        clippy::non_ascii_literal,
        reason = "Use of green checkmark for better UX."
    )]
    if check_config_only {
        println!("Config file is valid! ✅");
        return Ok(());
    }

    let _guard = config.logger.init()?;
    match command.unwrap_or(Command::Run { report_path: None }) {
        Command::Run { report_path } => commands::run(&config, report_path.as_deref()).await,
        Command::Report(args) => commands::report(&config, &args).await,
        Command::History { days } => commands::history(&config, days).await,
    }
}
