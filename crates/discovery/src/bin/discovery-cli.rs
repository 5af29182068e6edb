//! Discovery CLI Tool
//!
//! Verifies minisign-signed discovery files locally, fetches the signed
//! server and organization lists, and looks up a server's `info.json`.

use anyhow::{anyhow, bail, Context, Result};
use eduvpn_core::Config;
use eduvpn_crypto::{KeyRing, SignatureVerifier};
use eduvpn_discovery::{
    DiscoveryOrigin, DiscoveryService, HttpTransport, ReqwestTransport, ServerInfoFetcher,
};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// JSON output for verify command
#[derive(Debug, Serialize)]
struct VerifyOutput {
    valid: bool,
    key_id: Option<String>,
    message: String,
}

fn cmd_verify(data: PathBuf, signature: PathBuf, keys: Vec<String>, json: bool) -> Result<()> {
    let data_bytes =
        fs::read(&data).with_context(|| format!("Failed to read {}", data.display()))?;
    let signature_bytes = fs::read(&signature)
        .with_context(|| format!("Failed to read {}", signature.display()))?;
    let ring = KeyRing::try_from_base64(&keys).context("Invalid public key")?;

    let result = SignatureVerifier::default().verify(&data_bytes, &signature_bytes, &ring);

    let output = match &result {
        Ok(key_id) => VerifyOutput {
            valid: true,
            key_id: Some(key_id.to_string()),
            message: "Signature is valid".to_string(),
        },
        Err(e) => VerifyOutput {
            valid: false,
            key_id: None,
            message: e.to_string(),
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if output.valid {
        println!("✓ Signature is VALID");
        if let Some(key_id) = &output.key_id {
            println!("  Key id: {}", key_id);
        }
    } else {
        println!("✗ Signature is INVALID: {}", output.message);
    }

    result.map(|_| ()).map_err(|e| anyhow!("Verification failed: {}", e))
}

async fn cmd_fetch(config: PathBuf, list: String, origin: DiscoveryOrigin, json: bool) -> Result<()> {
    let config = Config::from_file(&config)
        .with_context(|| format!("Failed to load {}", config.display()))?;
    let service = DiscoveryService::from_config(&config)?;

    match list.as_str() {
        "servers" => {
            let servers = service.servers(origin).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(servers.as_ref())?);
            } else {
                println!("Server list (version {:?}, origin {})", servers.version, origin);
                for server in &servers.institute_access {
                    println!("  [institute] {} {}", server.base_url, server.display_name.resolve("en-US"));
                }
                for server in &servers.secure_internet {
                    println!("  [secure]    {} {}", server.base_url, server.country_code);
                }
            }
        }
        "organizations" => {
            let organizations = service.organizations(origin).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&organizations)?);
            } else {
                println!(
                    "Organization list (version {:?}, origin {})",
                    organizations.version, origin
                );
                for org in &organizations.organizations {
                    println!("  {} {}", org.org_id, org.display_name.resolve("en-US"));
                }
            }
        }
        other => bail!("Unknown list '{}', expected servers or organizations", other),
    }

    Ok(())
}

async fn cmd_server_info(base_url: String, timeout_secs: Option<u64>, json: bool) -> Result<()> {
    let mut transport_config = eduvpn_core::TransportConfig::default();
    if let Some(timeout_secs) = timeout_secs {
        transport_config.timeout_secs = timeout_secs;
    }
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&transport_config)?);
    let info = ServerInfoFetcher::new(transport).fetch(&base_url).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Server info for {}", base_url);
        println!("  Authorization endpoint: {}", info.authorization_endpoint);
        println!("  Token endpoint:         {}", info.token_endpoint);
        println!("  API base:               {}", info.api_base_url);
    }
    Ok(())
}

fn parse_args() -> Result<(String, Vec<String>)> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        bail!("Usage: discovery-cli <command> [options]");
    }

    Ok((args[1].clone(), args[2..].to_vec()))
}

fn print_usage() {
    println!("Discovery CLI - Verify and fetch signed eduVPN discovery data");
    println!();
    println!("USAGE:");
    println!("    discovery-cli verify --data <file> --signature <file> --key <base64>... [--json]");
    println!("    discovery-cli fetch --config <file> --list <servers|organizations> [--origin <cache|network>] [--json]");
    println!("    discovery-cli server-info --base-url <url> [--timeout <secs>] [--json]");
    println!();
    println!("COMMANDS:");
    println!("    verify        Verify a file against its minisign signature");
    println!("    fetch         Fetch and verify a discovery list");
    println!("    server-info   Fetch a server's info.json");
    println!();
    println!("EXAMPLES:");
    println!("    discovery-cli verify --data server_list.json --signature server_list.json.minisig --key RWRtBSX1...");
    println!("    discovery-cli fetch --config discovery.toml --list servers --origin network");
    println!("    discovery-cli server-info --base-url https://vpn.example.edu/");
}

/// Returns the value following the flag at `*i`, advancing past it.
fn flag_value(args: &[String], i: &mut usize) -> Result<String> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| anyhow!("Missing value for {}", flag))
}

async fn run(command: &str, args: &[String]) -> Result<()> {
    match command {
        "verify" => {
            let mut data = None;
            let mut signature = None;
            let mut keys = Vec::new();
            let mut json = false;

            let mut i = 0;
            while i < args.len() {
                match args[i].as_str() {
                    "--data" | "-d" => data = Some(PathBuf::from(flag_value(args, &mut i)?)),
                    "--signature" | "-s" => {
                        signature = Some(PathBuf::from(flag_value(args, &mut i)?))
                    }
                    "--key" | "-k" => keys.push(flag_value(args, &mut i)?),
                    "--json" => json = true,
                    other => bail!("Unknown argument '{}'", other),
                }
                i += 1;
            }

            let data = data.ok_or_else(|| anyhow!("Missing --data argument"))?;
            let signature = signature.ok_or_else(|| anyhow!("Missing --signature argument"))?;
            if keys.is_empty() {
                bail!("At least one --key is required");
            }
            cmd_verify(data, signature, keys, json)
        }
        "fetch" => {
            let mut config = None;
            let mut list = None;
            let mut origin = DiscoveryOrigin::Network;
            let mut json = false;

            let mut i = 0;
            while i < args.len() {
                match args[i].as_str() {
                    "--config" | "-c" => config = Some(PathBuf::from(flag_value(args, &mut i)?)),
                    "--list" | "-l" => list = Some(flag_value(args, &mut i)?),
                    "--origin" | "-o" => {
                        origin = flag_value(args, &mut i)?
                            .parse()
                            .map_err(|e: String| anyhow!(e))?
                    }
                    "--json" => json = true,
                    other => bail!("Unknown argument '{}'", other),
                }
                i += 1;
            }

            let config = config.ok_or_else(|| anyhow!("Missing --config argument"))?;
            let list = list.ok_or_else(|| anyhow!("Missing --list argument"))?;
            cmd_fetch(config, list, origin, json).await
        }
        "server-info" => {
            let mut base_url = None;
            let mut timeout_secs = None;
            let mut json = false;

            let mut i = 0;
            while i < args.len() {
                match args[i].as_str() {
                    "--base-url" | "-b" => base_url = Some(flag_value(args, &mut i)?),
                    "--timeout" | "-t" => {
                        timeout_secs = Some(
                            flag_value(args, &mut i)?
                                .parse()
                                .context("--timeout expects seconds")?,
                        )
                    }
                    "--json" => json = true,
                    other => bail!("Unknown argument '{}'", other),
                }
                i += 1;
            }

            let base_url = base_url.ok_or_else(|| anyhow!("Missing --base-url argument"))?;
            cmd_server_info(base_url, timeout_secs, json).await
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => bail!("Unknown command '{}'", other),
    }
}

#[tokio::main]
async fn main() {
    eduvpn_core::logging::init();

    let (command, args) = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            println!();
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = run(&command, &args).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
