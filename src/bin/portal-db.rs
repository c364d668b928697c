use portal_db::config::{self, Config};
use portal_db::core::db::schema;
use portal_db::users::{NewUser, UserStore};
use portal_db::{Gateway, GatewayError, Params, Result, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: portal-db [--config <path>] [--degraded] <command> [args...]

commands:
  check                                   report connection status
  init-schema                             create the users table if missing
  query <sql> [param...]                  run a statement, print rows as JSON
  exec <sql> [param...]                   run a statement, print rows affected
  signup <full-name> <email> <pw-hash>    insert a user
  lookup <email>                          print a user as JSON";

/// Parsed command line.
struct Cli {
    config_path: Option<PathBuf>,
    degraded: bool,
    command: Vec<String>,
}

fn parse_args(args: impl Iterator<Item = String>) -> std::result::Result<Cli, String> {
    let mut cli = Cli {
        config_path: None,
        degraded: false,
        command: Vec::new(),
    };
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" if cli.command.is_empty() => {
                let path = args.next().ok_or("--config needs a path")?;
                cli.config_path = Some(PathBuf::from(path));
            }
            "--degraded" if cli.command.is_empty() => cli.degraded = true,
            "-h" | "--help" if cli.command.is_empty() => return Err(USAGE.to_string()),
            _ => cli.command.push(arg),
        }
    }
    if cli.command.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(cli)
}

fn load(cli: &Cli) -> Result<Config> {
    match &cli.config_path {
        Some(path) => config::load_config(path),
        None => match config::default_config_path().filter(|p| p.exists()) {
            Some(path) => config::load_config(path),
            None => Ok(config::config_from_env()),
        },
    }
}

fn text_params(values: &[String]) -> Params {
    Params::Positional(values.iter().map(|v| Value::from(v.as_str())).collect())
}

fn run(gateway: &Gateway, command: &[String]) -> Result<()> {
    match command {
        [cmd] if cmd == "check" => {
            match gateway.error() {
                None => println!("connected: {}", gateway.config().database),
                Some(message) => println!("failed: {}", message),
            }
            Ok(())
        }
        [cmd] if cmd == "init-schema" => schema::provision(gateway),
        [cmd, sql, params @ ..] if cmd == "query" => {
            for row in gateway.result_set(sql, text_params(params))? {
                println!("{}", serde_json::to_string(&row)?);
            }
            Ok(())
        }
        [cmd, sql, params @ ..] if cmd == "exec" => {
            let affected = gateway.execute(sql, text_params(params))?;
            println!("rows affected: {}", affected);
            println!("last insert id: {}", gateway.last_insert_id()?);
            Ok(())
        }
        [cmd, full_name, email, password_hash] if cmd == "signup" => {
            let id = UserStore::new(gateway).create(&NewUser::new(
                full_name.as_str(),
                email.as_str(),
                password_hash.as_str(),
            ))?;
            println!("{}", id);
            Ok(())
        }
        [cmd, email] if cmd == "lookup" => match UserStore::new(gateway).find_by_email(email)? {
            Some(user) => {
                println!("{}", serde_json::to_string(&user)?);
                Ok(())
            }
            None => Err(GatewayError::Query(format!("no user with email {}", email))),
        },
        _ => Err(GatewayError::Config(format!("unrecognized command\n\n{}", USAGE))),
    }
}

fn main() -> ExitCode {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    // Initialize the logging system using tracing subscriber
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting portal-db...");

    let gateway = Gateway::connect(config.database);
    if !gateway.is_connected() {
        if cli.degraded {
            warn!("continuing without a database connection");
        } else {
            eprintln!("Database connection failed. Please try again later.");
            return ExitCode::FAILURE;
        }
    }

    match run(&gateway, &cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
