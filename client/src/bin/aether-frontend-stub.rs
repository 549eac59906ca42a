// Stand-in frontend daemon
//
// Honours the launch contract (`run --isdev=<bool> --clientip=<ip>
// --clientport=<port>`): binds its own loopback API, reports it to the host's
// client API server and then answers pings until killed.
//
// Test knobs:
// - AETHER_STUB_TRACE_FILE: append "<pid> <port>" once ready
// - AETHER_STUB_EXIT_AFTER_MS / AETHER_STUB_EXIT_CODE: exit on its own

use std::env;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

use aether_client_lib::handshake::protocol::{
    deserialize_message, serialize_message, ClientApiRequest, ClientApiResponse,
};
use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug)]
struct StubArgs {
    client_ip: String,
    client_port: u16,
    is_dev: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<StubArgs> {
    let mut args = args.into_iter();
    match args.next().as_deref() {
        Some("run") => {}
        other => bail!("Expected `run` subcommand, got {:?}", other),
    }

    let mut client_ip = None;
    let mut client_port = None;
    let mut is_dev = false;
    for arg in args {
        if let Some(value) = arg.strip_prefix("--clientip=") {
            client_ip = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("--clientport=") {
            client_port = Some(
                value
                    .parse::<u16>()
                    .with_context(|| format!("Invalid --clientport value: {}", value))?,
            );
        } else if let Some(value) = arg.strip_prefix("--isdev=") {
            is_dev = value == "true";
        } else {
            bail!("Unknown argument: {}", arg);
        }
    }

    Ok(StubArgs {
        client_ip: client_ip.context("Missing --clientip")?,
        client_port: client_port.context("Missing --clientport")?,
        is_dev,
    })
}

fn env_knob<T>(var: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(var) {
        Ok(value) if !value.is_empty() => parse_knob(var, &value).map(Some),
        _ => Ok(None),
    }
}

fn parse_knob<T>(var: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("{} must be an integer in range, got {:?}", var, value))
}

/// Send `FrontendReady` and wait for the acknowledgement
async fn report_ready(args: &StubArgs, api_port: u16) -> Result<()> {
    let mut stream = TcpStream::connect((args.client_ip.as_str(), args.client_port))
        .await
        .with_context(|| {
            format!(
                "Failed to connect to client API at {}:{}",
                args.client_ip, args.client_port
            )
        })?;

    let request = ClientApiRequest::FrontendReady {
        address: "127.0.0.1".to_string(),
        port: api_port,
    };
    stream.write_all(&serialize_message(&request)?).await?;

    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line).await?;
    match deserialize_message::<ClientApiResponse>(line.as_bytes())? {
        ClientApiResponse::FrontendReadyAck { .. } => Ok(()),
        other => bail!("Client API rejected FrontendReady: {:?}", other),
    }
}

async fn serve(listener: TcpListener) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        tokio::spawn(async move {
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let response = match deserialize_message::<ClientApiRequest>(line.as_bytes()) {
                    Ok(ClientApiRequest::Ping) => ClientApiResponse::Pong,
                    _ => continue,
                };
                let Ok(bytes) = serialize_message(&response) else { break };
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(env::args().skip(1))?;

    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("Failed to bind stub API")?;
    let api_port = listener.local_addr()?.port();

    report_ready(&args, api_port).await?;
    println!(
        "Frontend stub ready on port {} (isdev={}, pid {})",
        api_port,
        args.is_dev,
        std::process::id()
    );

    if let Ok(path) = env::var("AETHER_STUB_TRACE_FILE") {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path))?;
        writeln!(file, "{} {}", std::process::id(), api_port)?;
    }

    if let Some(ms) = env_knob::<u64>("AETHER_STUB_EXIT_AFTER_MS")? {
        let code = env_knob::<i32>("AETHER_STUB_EXIT_CODE")?.unwrap_or(1);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        eprintln!("Frontend stub exiting with code {}", code);
        std::process::exit(code);
    }

    serve(listener).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_launch_contract() {
        let parsed = parse_args(args(&[
            "run",
            "--isdev=false",
            "--clientip=127.0.0.1",
            "--clientport=5000",
        ]))
        .unwrap();
        assert_eq!(parsed.client_ip, "127.0.0.1");
        assert_eq!(parsed.client_port, 5000);
        assert!(!parsed.is_dev);
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        let err = parse_args(args(&["run", "--clientip=127.0.0.1"])).unwrap_err();
        assert!(err.to_string().contains("--clientport"));
    }

    #[test]
    fn test_exit_code_knob_rejects_out_of_range_values() {
        assert_eq!(parse_knob::<i32>("AETHER_STUB_EXIT_CODE", "3").unwrap(), 3);
        assert_eq!(parse_knob::<i32>("AETHER_STUB_EXIT_CODE", "-2").unwrap(), -2);

        // Would wrap to 1 if narrowed from a wider integer
        let err = parse_knob::<i32>("AETHER_STUB_EXIT_CODE", "4294967297").unwrap_err();
        assert!(err.to_string().contains("AETHER_STUB_EXIT_CODE"));
        assert!(parse_knob::<u64>("AETHER_STUB_EXIT_AFTER_MS", "soon").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_subcommand() {
        assert!(parse_args(args(&["--clientport=1"])).is_err());
    }
}
