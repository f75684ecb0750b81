//! Command-line helpers around the quadratic ballot primitives.
//!
//! Exposes operator key generation, content-derived address computation,
//! ledger root computation, proposal derivation, consolidation signing and
//! transaction-log reconciliation.

use quadratic_ballot::{
    booth_template, derive_proposals, load_or_derive_key, load_stream, operator_address,
    parse_votes, reconcile, sign::encode_public_key_base64, sign::encode_signature_base64,
    sign_consolidation, smt::digest_to_hex, write_reconciliation, Address, BoothConfig,
    BoothParams, DefaultHashes, Ed25519KeySource, MotionRegistry, Params, Side, SparseTree,
    Template,
};
use std::{env, fs, path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: qvote <keygen|address|root|proposals|sign-consolidate|reconcile> ...");
    println!("  keygen [--seed <text> | <key-file>] [--out <file>]");
    println!("  address [--template <hex-file> --placeholder NAME=HEX ...] --param NAME=HEX ...");
    println!("  root [--config <file>] [--depth <D>] [--leaf INDEX=VOTES ...]");
    println!("  proposals --count <N> --key <spec> --credits <addr> --votes <addr>");
    println!("            --collection <addr> [--config <file>] [--depth <D>] [--out <file>]");
    println!("  --depth beats QV_DEPTH, which beats the config file");
    println!("  sign-consolidate --key <spec> --booth <addr>");
    println!("  reconcile --txs <file> --registry <file> --out <dir>");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let mut args = env::args().skip(1);
    let command = args.next();
    let tail: Vec<String> = args.collect();
    match command.as_deref() {
        Some("keygen") => cmd_keygen(tail),
        Some("address") => cmd_address(tail),
        Some("root") => cmd_root(tail),
        Some("proposals") => cmd_proposals(tail),
        Some("sign-consolidate") => cmd_sign_consolidate(tail),
        Some("reconcile") => cmd_reconcile(tail),
        Some("-h") | Some("--help") => print_help(),
        _ => {
            print_help();
            std::process::exit(1);
        }
    }
}

fn split_pair<'a>(flag: &str, raw: &'a str) -> (&'a str, &'a str) {
    raw.split_once('=')
        .unwrap_or_else(|| fatal(&format!("{flag} expects NAME=VALUE, got {raw}")))
}

fn parse_address(flag: &str, raw: &str) -> Address {
    Address::from_hex(raw).unwrap_or_else(|err| fatal(&format!("invalid {flag}: {err}")))
}

fn parse_depth(raw: &str) -> u8 {
    raw.parse()
        .unwrap_or_else(|_| fatal(&format!("invalid --depth {raw}")))
}

fn resolve_depth(config: Option<PathBuf>, depth: Option<u8>) -> u8 {
    let config = BoothConfig::resolve(config.as_deref())
        .unwrap_or_else(|err| fatal(&format!("invalid config: {err}")));
    depth.unwrap_or(config.depth)
}

fn cmd_keygen(args: Vec<String>) {
    let mut key_spec: Option<String> = None;
    let mut out_path: Option<PathBuf> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seed" => {
                let seed = iter
                    .next()
                    .unwrap_or_else(|| fatal("--seed expects a value"));
                key_spec = Some(format!("ed25519://{seed}"));
            }
            "--out" => {
                out_path = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--out expects a value")),
                ));
            }
            value => {
                if key_spec.is_none() {
                    key_spec = Some(value.to_string());
                } else {
                    fatal(&format!("unknown argument: {value}"));
                }
            }
        }
    }

    let source = Ed25519KeySource::from_spec(key_spec.as_deref());
    let signing = load_or_derive_key(&source)
        .unwrap_or_else(|err| fatal(&format!("failed to derive key: {err}")));
    let verifying = signing.verifying_key();
    if let Some(path) = out_path {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        fs::write(&path, format!("{}\n", hex::encode(signing.to_bytes())))
            .unwrap_or_else(|err| fatal(&format!("failed to write key: {err}")));
        println!("secret_key_path: {}", path.display());
    }
    println!("public_key_b64: {}", encode_public_key_base64(&verifying));
    println!("operator_address: {}", operator_address(&verifying));
}

fn cmd_address(args: Vec<String>) {
    let mut template_path: Option<PathBuf> = None;
    let mut placeholders: Vec<(String, String)> = Vec::new();
    let mut params = Params::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--template" => {
                template_path = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--template expects a value")),
                ));
            }
            "--placeholder" => {
                let raw = iter
                    .next()
                    .unwrap_or_else(|| fatal("--placeholder expects a value"));
                let (name, pattern) = split_pair("--placeholder", &raw);
                placeholders.push((name.to_string(), pattern.to_string()));
            }
            "--param" => {
                let raw = iter
                    .next()
                    .unwrap_or_else(|| fatal("--param expects a value"));
                let (name, value) = split_pair("--param", &raw);
                params = params
                    .hex(name, value)
                    .unwrap_or_else(|err| fatal(&format!("invalid --param: {err}")));
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    let template = match template_path {
        Some(path) => {
            let code = fs::read_to_string(&path).unwrap_or_else(|err| {
                fatal(&format!("failed to read {}: {err}", path.display()))
            });
            Template::from_hex(
                &code,
                placeholders
                    .iter()
                    .map(|(name, pattern)| (name.as_str(), pattern.as_str())),
            )
        }
        None => booth_template(),
    }
    .unwrap_or_else(|err| fatal(&format!("invalid template: {err}")));
    let specialized = template
        .specialize(&params)
        .unwrap_or_else(|err| fatal(&format!("failed to specialize: {err}")));
    println!("{}", specialized.address());
}

fn cmd_root(args: Vec<String>) {
    let mut config: Option<PathBuf> = None;
    let mut depth: Option<u8> = None;
    let mut leaves: Vec<(u64, i128)> = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--config expects a value")),
                ));
            }
            "--depth" => {
                depth = Some(parse_depth(
                    &iter
                        .next()
                        .unwrap_or_else(|| fatal("--depth expects a value")),
                ));
            }
            "--leaf" => {
                let raw = iter
                    .next()
                    .unwrap_or_else(|| fatal("--leaf expects a value"));
                let (index, votes) = split_pair("--leaf", &raw);
                let index = index
                    .parse::<u64>()
                    .unwrap_or_else(|_| fatal(&format!("invalid leaf index {index}")));
                let value = parse_votes(votes)
                    .unwrap_or_else(|err| fatal(&format!("invalid leaf value: {err}")));
                leaves.push((index, value));
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    let defaults = DefaultHashes::new(resolve_depth(config, depth))
        .unwrap_or_else(|err| fatal(&format!("invalid depth: {err}")));
    let tree = SparseTree::with_leaves(Arc::new(defaults), leaves)
        .unwrap_or_else(|err| fatal(&format!("invalid leaf: {err}")));
    println!("{}", digest_to_hex(&tree.root()));
}

fn cmd_proposals(args: Vec<String>) {
    let mut count: Option<u64> = None;
    let mut key_spec: Option<String> = None;
    let mut credits: Option<Address> = None;
    let mut votes: Option<Address> = None;
    let mut collection: Option<Address> = None;
    let mut config: Option<PathBuf> = None;
    let mut depth: Option<u8> = None;
    let mut out_path: Option<PathBuf> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .unwrap_or_else(|| fatal(&format!("{flag} expects a value")))
        };
        match arg.as_str() {
            "--count" => {
                let raw = value("--count");
                count = Some(
                    raw.parse()
                        .unwrap_or_else(|_| fatal(&format!("invalid --count {raw}"))),
                );
            }
            "--key" => key_spec = Some(value("--key")),
            "--credits" => credits = Some(parse_address("--credits", &value("--credits"))),
            "--votes" => votes = Some(parse_address("--votes", &value("--votes"))),
            "--collection" => {
                collection = Some(parse_address("--collection", &value("--collection")))
            }
            "--config" => config = Some(PathBuf::from(value("--config"))),
            "--depth" => depth = Some(parse_depth(&value("--depth"))),
            "--out" => out_path = Some(PathBuf::from(value("--out"))),
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    let key_spec = key_spec.unwrap_or_else(|| fatal("--key is required"));
    let signing = load_or_derive_key(&Ed25519KeySource::from_spec(Some(&key_spec)))
        .unwrap_or_else(|err| fatal(&format!("failed to derive key: {err}")));
    let base = BoothParams {
        credits: credits.unwrap_or_else(|| fatal("--credits is required")),
        votes: votes.unwrap_or_else(|| fatal("--votes is required")),
        operator_key: signing.verifying_key(),
        collection: collection.unwrap_or_else(|| fatal("--collection is required")),
        motion: 0,
        side: Side::Support,
        support: Address::ZERO,
        oppose: Address::ZERO,
    };
    let template = booth_template().unwrap_or_else(|err| fatal(&format!("{err}")));
    let proposals = derive_proposals(
        &template,
        &base,
        resolve_depth(config, depth),
        count.unwrap_or_else(|| fatal("--count is required")),
    )
    .unwrap_or_else(|err| fatal(&format!("failed to derive proposals: {err}")));
    let json = serde_json::to_string_pretty(&proposals)
        .unwrap_or_else(|err| fatal(&format!("failed to encode proposals: {err}")));
    match out_path {
        Some(path) => {
            fs::write(&path, format!("{json}\n"))
                .unwrap_or_else(|err| fatal(&format!("failed to write proposals: {err}")));
            println!("proposals: {} -> {}", proposals.len(), path.display());
        }
        None => println!("{json}"),
    }
}

fn cmd_sign_consolidate(args: Vec<String>) {
    let mut key_spec: Option<String> = None;
    let mut booth: Option<Address> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--key" => {
                key_spec = Some(
                    iter.next()
                        .unwrap_or_else(|| fatal("--key expects a value")),
                );
            }
            "--booth" => {
                let raw = iter
                    .next()
                    .unwrap_or_else(|| fatal("--booth expects a value"));
                booth = Some(parse_address("--booth", &raw));
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    let key_spec = key_spec.unwrap_or_else(|| fatal("--key is required"));
    let booth = booth.unwrap_or_else(|| fatal("--booth is required"));
    let signing = load_or_derive_key(&Ed25519KeySource::from_spec(Some(&key_spec)))
        .unwrap_or_else(|err| fatal(&format!("failed to derive key: {err}")));
    println!(
        "signature_b64: {}",
        encode_signature_base64(&sign_consolidation(&signing, &booth))
    );
}

fn cmd_reconcile(args: Vec<String>) {
    let mut txs: Option<PathBuf> = None;
    let mut registry: Option<PathBuf> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--txs" => {
                txs = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--txs expects a value")),
                ));
            }
            "--registry" => {
                registry = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--registry expects a value")),
                ));
            }
            "--out" => {
                out_dir = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| fatal("--out expects a value")),
                ));
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    let txs = txs.unwrap_or_else(|| fatal("--txs is required"));
    let registry = registry.unwrap_or_else(|| fatal("--registry is required"));
    let out_dir = out_dir.unwrap_or_else(|| fatal("--out is required"));
    let records =
        load_stream(&txs).unwrap_or_else(|err| fatal(&format!("failed to load log: {err}")));
    let registry = MotionRegistry::load(&registry)
        .unwrap_or_else(|err| fatal(&format!("failed to load registry: {err}")));
    let outcome = reconcile(&records, &registry)
        .unwrap_or_else(|err| fatal(&format!("reconciliation failed: {err}")));
    let paths = write_reconciliation(&outcome, &out_dir)
        .unwrap_or_else(|err| fatal(&format!("failed to write artifacts: {err}")));
    for path in paths {
        println!("wrote {}", path.display());
    }
    println!("total txs: {}", outcome.summary.records);
    println!("voters: {}", outcome.summary.voters);
    println!("skipped: {}", outcome.summary.skipped);
}
