use std::io::IsTerminal;
use std::path::PathBuf;

use argh::FromArgs;
use discovery::{FileSdWriter, TargetGroup, to_file_sd};
use exitcode::ExitCode;
use nacos_sd::{Config, Error, NacosDiscovery, signal, trace};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(FromArgs)]
#[argh(
    description = "Discover scrape targets from Nacos, and publish them in the Prometheus file_sd format",
    help_triggers("-h", "--help")
)]
struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(switch, description = "output logs in JSON format")]
    log_json: bool,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read configuration from file, defaults are used if not set"
    )]
    config: Option<PathBuf>,

    #[argh(
        switch,
        description = "discover targets once, print them to stdout and exit"
    )]
    once: bool,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("nacos-sd {PKG_VERSION}");
    }

    fn load_config(&self) -> Result<Config, ExitCode> {
        let result = match &self.config {
            Some(path) => Config::load(path),
            None => {
                let config = Config::default();
                config.validate().map(|_| config)
            }
        };

        result.map_err(|err| {
            error!(message = "Load config failed", config = ?self.config, %err);
            exitcode::CONFIG
        })
    }

    fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        let levels =
            std::env::var("NACOS_SD_LOG").unwrap_or_else(|_| trace::directives(&self.log_level));
        let color = std::io::stderr().is_terminal();
        trace::init(color, self.log_json, &levels);

        let config = self.load_config()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("nacos-sd-worker")
            .enable_all()
            .build()
            .map_err(|err| {
                error!(message = "Build tokio runtime failed", %err);
                exitcode::OSERR
            })?;

        runtime.block_on(self.serve(config))
    }

    async fn serve(&self, config: Config) -> Result<(), ExitCode> {
        let discoverer = NacosDiscovery::new(&config).map_err(|err| {
            error!(message = "Build nacos discovery failed", %err);
            match err {
                Error::Environment(_) => exitcode::OSERR,
                _ => exitcode::CONFIG,
            }
        })?;

        let shutdown = CancellationToken::new();
        signal::shutdown_on_signals(shutdown.clone()).map_err(|err| {
            error!(message = "Register signal handlers failed", %err);
            exitcode::OSERR
        })?;

        if self.once {
            return match discoverer.refresh(&shutdown).await {
                Ok(groups) => print_targets(&groups),
                Err(err) => {
                    error!(message = "Discover targets failed", %err);
                    Err(exitcode::UNAVAILABLE)
                }
            };
        }

        info!(
            message = "Start nacos discovery",
            server = %config.server,
            namespace = %config.namespace,
            group = %config.group,
            interval = ?config.refresh_interval,
            output = ?config.output,
        );

        let (tx, mut rx) = mpsc::channel(1);
        let handle = tokio::spawn(discovery::run(
            discoverer,
            config.refresh_interval,
            shutdown.clone(),
            tx,
        ));

        let writer = config.output.clone().map(FileSdWriter::new);
        while let Some(groups) = rx.recv().await {
            match &writer {
                Some(writer) => {
                    if let Err(err) = writer.write(&groups).await {
                        warn!(
                            message = "Write targets failed",
                            path = ?writer.path(),
                            %err,
                        );
                    }
                }
                None => print_targets(&groups)?,
            }
        }

        if let Err(err) = handle.await {
            error!(message = "Discovery task failed", %err);
            return Err(exitcode::SOFTWARE);
        }

        info!(message = "Nacos discovery stopped");

        Ok(())
    }
}

#[allow(clippy::print_stdout)]
fn print_targets(groups: &[TargetGroup]) -> Result<(), ExitCode> {
    let text = serde_json::to_string(&to_file_sd(groups)).map_err(|err| {
        error!(message = "Encode targets failed", %err);
        exitcode::SOFTWARE
    })?;

    println!("{text}");

    Ok(())
}

fn main() {
    let opts: RootCommand = argh::from_env();

    if let Err(code) = opts.run() {
        std::process::exit(code);
    }
}
