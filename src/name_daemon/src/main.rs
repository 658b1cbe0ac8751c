mod daemon;

use std::env;
use std::path::PathBuf;

use dfs_lib::config::{parse_duration, parse_log_level};
use log::error;

use crate::daemon::{run_name_daemon, NameDaemonConfig};

fn usage() -> String {
    "usage: nameserver [options]\n\
     options:\n\
     --log-level <off|error|warn|info|debug|trace>   (default info)\n\
     --host <host>                                   (default localhost)\n\
     --port <port>                                   (default 53035)\n\
     --db <db-path>                                  (default nameserver.db)\n\
     --token-expiration <dur>                        (default 24h)\n\
     --num-replicas <n>                              (default 1)\n\
     --node-expiration <dur>                         (default 15m)\n\
     --healing-interval <dur>                        (default 1m)"
        .to_string()
}

fn parse_args() -> Result<(NameDaemonConfig, log::LevelFilter), String> {
    let args = env::args().skip(1).collect::<Vec<String>>();
    if args.first().map(|a| a.as_str()) == Some("-h")
        || args.first().map(|a| a.as_str()) == Some("--help")
    {
        return Err(usage());
    }

    let mut config = NameDaemonConfig::default();
    let mut log_level = log::LevelFilter::Info;

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        i += 1;
        let value = args
            .get(i)
            .ok_or_else(|| format!("missing value for {}\n{}", flag, usage()))?;
        match flag {
            "--log-level" => {
                log_level = parse_log_level(value).map_err(|e| e.to_string())?;
            }
            "--host" => config.host = value.clone(),
            "--port" => {
                config.port = value
                    .parse()
                    .map_err(|_| format!("invalid port '{}'", value))?;
            }
            "--db" => config.db_path = PathBuf::from(value),
            "--token-expiration" => {
                config.token_expiration = parse_duration(value).map_err(|e| e.to_string())?;
            }
            "--num-replicas" => {
                config.num_replicas = value
                    .parse()
                    .map_err(|_| format!("invalid replica count '{}'", value))?;
            }
            "--node-expiration" => {
                config.node_expiration = parse_duration(value).map_err(|e| e.to_string())?;
            }
            "--healing-interval" => {
                config.healing_interval = parse_duration(value).map_err(|e| e.to_string())?;
            }
            other => {
                return Err(format!("unknown argument: {}\n{}", other, usage()));
            }
        }
        i += 1;
    }

    Ok((config, log_level))
}

fn main() {
    let (config, log_level) = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(1);
        }
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_name_daemon(config)) {
        error!("run nameserver failed: {}", e);
        std::process::exit(1);
    }
}
