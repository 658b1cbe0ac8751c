mod daemon;

use std::env;
use std::path::PathBuf;

use dfs_lib::config::{parse_duration, parse_log_level};
use log::error;

use crate::daemon::{run_node_daemon, NodeDaemonConfig};

fn usage() -> String {
    "usage: nodeserver --name-node <host:port> [options]\n\
     options:\n\
     --log-level <off|error|warn|info|debug|trace>   (default info)\n\
     --host <host>                                   (default localhost)\n\
     --port <port>                                   (default 50051)\n\
     --dir <data-dir>                                (default ./data)\n\
     --db <catalog-db-path>                          (default <dir>/catalog.db)\n\
     --report-interval <dur>                         (default 1m)\n\
     --health-check-interval <dur>                   (default 1m)\n\
     --crc-check-interval <dur>                      (default 24h)\n\
     --node-id <id>                                  (default <host>:<port>)\n\
     --location <path>                               (default /)\n\
     --etcd-endpoint <url>                           (discovery off when absent)\n\
     --etcd-lease <dur>                              (default 2m)\n\
     --etcd-interval <dur>                           (default 1m)"
        .to_string()
}

fn parse_args() -> Result<(NodeDaemonConfig, log::LevelFilter), String> {
    let args = env::args().skip(1).collect::<Vec<String>>();
    if args.first().map(|a| a.as_str()) == Some("-h")
        || args.first().map(|a| a.as_str()) == Some("--help")
    {
        return Err(usage());
    }

    let mut config = NodeDaemonConfig::default();
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
            "--name-node" => config.name_node = value.clone(),
            "--dir" => config.data_dir = PathBuf::from(value),
            "--db" => config.db_path = Some(PathBuf::from(value)),
            "--report-interval" => {
                config.report_interval = parse_duration(value).map_err(|e| e.to_string())?;
            }
            "--health-check-interval" => {
                config.health_check_interval =
                    parse_duration(value).map_err(|e| e.to_string())?;
            }
            "--crc-check-interval" => {
                config.crc_check_interval = parse_duration(value).map_err(|e| e.to_string())?;
            }
            "--node-id" => config.node_id = Some(value.clone()),
            "--location" => config.location = value.clone(),
            "--etcd-endpoint" => config.etcd_endpoint = Some(value.clone()),
            "--etcd-lease" => {
                config.etcd_lease = parse_duration(value).map_err(|e| e.to_string())?;
            }
            "--etcd-interval" => {
                config.etcd_interval = parse_duration(value).map_err(|e| e.to_string())?;
            }
            other => {
                return Err(format!("unknown argument: {}\n{}", other, usage()));
            }
        }
        i += 1;
    }

    if config.name_node.is_empty() {
        return Err(format!("--name-node is required\n{}", usage()));
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

    if let Err(e) = runtime.block_on(run_node_daemon(config)) {
        error!("run nodeserver failed: {}", e);
        std::process::exit(1);
    }
}
