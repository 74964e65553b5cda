mod commands;
mod config;
mod message;
mod opcodes;

use std::env;
use std::io::Result;
use std::net::TcpStream;

use commands::*;
use config::Config;
use message::Message;
use opcodes::*;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 7401;

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  fluxctl put <key> <value>");
    eprintln!("  fluxctl get <key>");
    eprintln!("  fluxctl get-local <key>");
    eprintln!("  fluxctl stats");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  FLUX_HOST - Server host (default: 127.0.0.1, or ~/.fluxrc)");
    eprintln!("  FLUX_PORT - Server client port (default: 7401, or ~/.fluxrc)");
}

fn server_addr() -> (String, u16) {
    let file_config = Config::load().unwrap_or_default();

    let host = env::var("FLUX_HOST")
        .ok()
        .or(file_config.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = env::var("FLUX_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .or(file_config.port)
        .unwrap_or(DEFAULT_PORT);

    (host, port)
}

fn print_get_response(response: &Message, key: &str) {
    if !response.error.is_empty() {
        eprintln!("ERR {}", response.error);
        if response.is_stale {
            eprintln!("(value exists but exceeds the staleness bound)");
        }
        std::process::exit(1);
    }
    if !response.found {
        eprintln!("ERR KEY_NOT_FOUND: {}", key);
        std::process::exit(1);
    }

    println!("{}", String::from_utf8_lossy(&response.value));
    if response.is_stale {
        eprintln!("(stale: exceeds the staleness bound)");
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let command = &args[1];
    let (host, port) = server_addr();
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))?;

    match command.as_str() {
        COMMAND_PUT => {
            if args.len() < 4 {
                eprintln!("Error: put requires <key> and <value>");
                print_usage();
                std::process::exit(1);
            }
            let key = &args[2];
            let value = args[3].clone().into_bytes();

            let message = Message::request(OP_PUT, key, value);
            message.send(&mut stream)?;

            let response = Message::receive(&mut stream)?;
            if !response.success {
                eprintln!("ERR {}", response.error);
                std::process::exit(1);
            }
            println!(
                "OK PUT {} (version {}, hlc {}.{})",
                key, response.version, response.hlc_physical, response.hlc_logical
            );
        }
        COMMAND_GET => {
            if args.len() < 3 {
                eprintln!("Error: get requires <key>");
                print_usage();
                std::process::exit(1);
            }
            let key = &args[2];

            let message = Message::request(OP_GET, key, Vec::new());
            message.send(&mut stream)?;

            let response = Message::receive(&mut stream)?;
            print_get_response(&response, key);
        }
        COMMAND_GET_LOCAL => {
            if args.len() < 3 {
                eprintln!("Error: get-local requires <key>");
                print_usage();
                std::process::exit(1);
            }
            let key = &args[2];

            let message = Message::request(OP_GET_LOCAL, key, Vec::new());
            message.send(&mut stream)?;

            let response = Message::receive(&mut stream)?;
            print_get_response(&response, key);
        }
        COMMAND_STATS => {
            let message = Message::request(OP_STATS, "", Vec::new());
            message.send(&mut stream)?;

            let response = Message::receive(&mut stream)?;
            println!("{}", String::from_utf8_lossy(&response.value));
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
