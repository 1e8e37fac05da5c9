//! Command line front end for a segmask project.

use std::{fmt, fs, path::PathBuf, process, sync::Arc};

use tracing::info;

use segmask::{
    app_dirs,
    config::{self, ConfigError},
    consensus::{ActionError, AnnotationService, MergeOutcome, ServiceError, SqliteActions},
    error::ErrorKind,
    features::{BandCube, FeatureError},
    logging,
};

const ACTIONS_DB_FILE_NAME: &str = "actions.db";

fn main() {
    if let Err(err) = run(std::env::args().skip(1).collect()) {
        eprintln!("{err}");
        process::exit(err.kind().exit_code());
    }
}

#[derive(Debug)]
enum CliError {
    Usage(String),
    Io { path: PathBuf, source: std::io::Error },
    Config(ConfigError),
    Actions(ActionError),
    Features(FeatureError),
    Service(ServiceError),
}

impl CliError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_) => ErrorKind::Validation,
            Self::Io { .. } => ErrorKind::Io,
            Self::Config(_) => ErrorKind::Config,
            Self::Actions(_) => ErrorKind::Internal,
            Self::Features(_) => ErrorKind::Io,
            Self::Service(err) => err.kind(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(msg) => write!(f, "{msg}\nRun `segmask --help` for usage."),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Config(err) => write!(f, "{err}"),
            Self::Actions(err) => write!(f, "{err}"),
            Self::Features(err) => write!(f, "{err}"),
            Self::Service(err) => write!(f, "{}: {err}", err.kind()),
        }
    }
}

impl From<ServiceError> for CliError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Save,
    Merge,
    Load,
    Predict,
    Export,
    Complete,
}

impl Command {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "save" => Self::Save,
            "merge" => Self::Merge,
            "load" => Self::Load,
            "predict" => Self::Predict,
            "export" => Self::Export,
            "complete" => Self::Complete,
            _ => return None,
        })
    }
}

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    actions: Option<PathBuf>,
    app_home: Option<PathBuf>,
    image: Option<String>,
    user: Option<String>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    source: Option<PathBuf>,
    request: Option<PathBuf>,
    undo: bool,
}

impl Options {
    fn image(&self) -> Result<&str, CliError> {
        self.image.as_deref().ok_or_else(|| missing("--image"))
    }

    fn user(&self) -> Result<&str, CliError> {
        self.user.as_deref().ok_or_else(|| missing("--user"))
    }

    fn path<'a>(value: &'a Option<PathBuf>, flag: &str) -> Result<&'a PathBuf, CliError> {
        value.as_ref().ok_or_else(|| missing(flag))
    }
}

fn missing(flag: &str) -> CliError {
    CliError::Usage(format!("Missing required {flag}"))
}

fn run(args: Vec<String>) -> Result<(), CliError> {
    let Some((command, options)) = parse_args(args)? else {
        return Ok(());
    };
    if let Some(home) = options.app_home.clone() {
        if !app_dirs::set_home_flag(home) {
            eprintln!("--app-home was already applied; keeping the first value");
        }
    }
    match logging::init() {
        Ok(log_path) => info!(command = ?command, log = %log_path.display(), "segmask started"),
        Err(err) => eprintln!("Logging disabled: {err}"),
    }

    let config_path = Options::path(&options.config, "--config")?;
    let config = config::load_from_path(config_path).map_err(CliError::Config)?;
    let actions_path = options
        .actions
        .clone()
        .unwrap_or_else(|| config.path.join(ACTIONS_DB_FILE_NAME));
    let actions = SqliteActions::open(&actions_path).map_err(CliError::Actions)?;
    let service = AnnotationService::new(config, Arc::new(actions));

    match command {
        Command::Save => {
            let input = Options::path(&options.input, "--input")?;
            let bytes = read_file(input)?;
            let outcome = service.save_mask(options.image()?, options.user()?, &bytes)?;
            report_merge(options.image()?, &outcome);
        }
        Command::Merge => {
            let outcome = service.merge_image(options.image()?)?;
            report_merge(options.image()?, &outcome);
        }
        Command::Load => {
            let output = Options::path(&options.output, "--output")?;
            let bytes = match options.user.as_deref() {
                Some(user) => service.load_mask(options.image()?, user)?,
                None => service.load_combined_mask(options.image()?)?,
            };
            write_file(output, &bytes)?;
            println!("Wrote {} bytes to {}", bytes.len(), output.display());
        }
        Command::Predict => {
            let source = Options::path(&options.source, "--source")?;
            let request = read_file(Options::path(&options.request, "--request")?)?;
            let output = Options::path(&options.output, "--output")?;
            let cube = BandCube::open(source).map_err(CliError::Features)?;
            let labels =
                service.predict_mask(options.image()?, options.user()?, &cube, &request)?;
            write_file(output, &labels)?;
            println!("Predicted {} pixels into {}", labels.len(), output.display());
        }
        Command::Export => {
            let source = Options::path(&options.source, "--source")?;
            let download = service.download_final_mask(options.image()?, options.user()?, source)?;
            let dir = options.output.clone().unwrap_or_else(|| PathBuf::from("."));
            let target = dir.join(&download.file_name);
            write_file(&target, &download.mask.bytes)?;
            if let Some(kind) = download.mask.format.degradation() {
                eprintln!(
                    "Warning: {kind} ({}), the mask was exported unaligned",
                    kind.status_code()
                );
            }
            println!("Exported {:?} mask to {}", download.mask.format, target.display());
        }
        Command::Complete => {
            let outcome = service.mark_complete(options.image()?, options.user()?, !options.undo)?;
            report_merge(options.image()?, &outcome);
        }
    }
    Ok(())
}

fn report_merge(image_id: &str, outcome: &MergeOutcome) {
    match &outcome.consensus {
        Some(consensus) => {
            println!(
                "{image_id}: {} contributors, {}",
                consensus.users.len(),
                if consensus.verified { "verified" } else { "unverified" }
            );
            for (user, score) in &consensus.scores {
                println!("  {user}: {score}%");
            }
        }
        None => println!("{image_id}: no contributors"),
    }
    if let Some(combined) = &outcome.combined {
        println!("  combined from {} complete contributors", combined.users.len());
    }
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>, CliError> {
    fs::read(path).map_err(|source| CliError::Io {
        path: path.clone(),
        source,
    })
}

fn write_file(path: &PathBuf, bytes: &[u8]) -> Result<(), CliError> {
    fs::write(path, bytes).map_err(|source| CliError::Io {
        path: path.clone(),
        source,
    })
}

fn parse_args(args: Vec<String>) -> Result<Option<(Command, Options)>, CliError> {
    if args.is_empty() || args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(None);
    }
    let mut it = args.into_iter();
    let name = it.next().unwrap_or_default();
    let command = Command::parse(&name)
        .ok_or_else(|| CliError::Usage(format!("Unknown command: {name}")))?;
    let mut options = Options::default();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .ok_or_else(|| CliError::Usage(format!("Missing value for {flag}")))
        };
        match arg.as_str() {
            "--config" => options.config = Some(PathBuf::from(value("--config")?)),
            "--actions" => options.actions = Some(PathBuf::from(value("--actions")?)),
            "--app-home" => options.app_home = Some(PathBuf::from(value("--app-home")?)),
            "--image" => options.image = Some(value("--image")?),
            "--user" => options.user = Some(value("--user")?),
            "--input" => options.input = Some(PathBuf::from(value("--input")?)),
            "--output" => options.output = Some(PathBuf::from(value("--output")?)),
            "--source" => options.source = Some(PathBuf::from(value("--source")?)),
            "--request" => options.request = Some(PathBuf::from(value("--request")?)),
            "--undo" => options.undo = true,
            _ => return Err(CliError::Usage(format!("Unknown argument: {arg}"))),
        }
    }
    Ok(Some((command, options)))
}

fn print_help() {
    println!("Usage: segmask <command> --config <project.toml> [options]");
    println!();
    println!("Commands:");
    println!("  save      --image <id> --user <id> --input <buffer>   Store a mask and re-merge");
    println!("  merge     --image <id>                                Recompute the consensus");
    println!("  load      --image <id> [--user <id>] --output <file>  Fetch a mask buffer");
    println!("  predict   --image <id> --user <id> --source <image> --request <json> --output <file>");
    println!("  export    --image <id> --user <id> --source <image> [--output <dir>]");
    println!("  complete  --image <id> --user <id> [--undo]           Toggle completion");
    println!();
    println!("Options:");
    println!("  --actions <path>   Action database (defaults to <project>/actions.db)");
    println!("  --app-home <dir>   Base directory for logs (overrides SEGMASK_CONFIG_HOME)");
    println!();
    println!("Set SEGMASK_LOG (e.g. segmask=debug) to change log verbosity.");
}
