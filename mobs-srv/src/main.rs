//! `mrpcsrv` — the reference MRPC-EC server (§6.3): a threaded TCP accept
//! loop that logs clients in and echoes `MrpcPerson` back with a fixed name,
//! matching the handshake-success scenario (§8 S1).

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use mobs_crypto::ecdh::StaticKeyPair;
use mobs_crypto::keys::{private_key_from_pem, private_key_to_pem, public_key_from_pem};
use mobs_mrpc::cache::SessionCache;
use mobs_mrpc::engine::ServerAuthority;
use mobs_mrpc::{EngineError, MrpcEc};
use mobs_types::{FieldDescriptor, FieldKind, Record, ScalarHint, Traverse, Value};
use p256::PublicKey;

const NAME: FieldDescriptor = FieldDescriptor {
    name: "name",
    alt_name: None,
    key_ordinal: None,
    as_attribute: false,
    nullable: false,
    encrypted: false,
    kind: FieldKind::Scalar(ScalarHint::PlainString),
};

/// The handshake-success demo object (§8 S1's `MrpcPerson`).
#[derive(Clone, Debug)]
struct MrpcPerson {
    name: String,
}

impl Traverse for MrpcPerson {
    const TYPE_NAME: &'static str = "MrpcPerson";

    fn descriptor() -> &'static [FieldDescriptor] {
        &[NAME]
    }

    fn to_record(&self) -> Record {
        let mut r = Record::new(Self::TYPE_NAME);
        r.push(NAME, Value::Str(self.name.clone()));
        r
    }

    fn from_record(record: &Record) -> Result<Self, mobs_types::Error> {
        Ok(Self {
            name: record
                .get_required("name")?
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| mobs_types::Error::TypeMismatch { field: "name".to_string(), expected: "string" })?,
        })
    }
}

/// Background process to serve MRPC-EC logins and echo `MrpcPerson` calls.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on (binds `0.0.0.0:PORT`).
    #[arg(short = 'P', long)]
    port: u16,

    /// Verbose logging (`debug` instead of `info`).
    #[arg(short, long)]
    verbose: bool,

    /// PEM file holding the server's static private key; generated fresh
    /// (and printed) if omitted.
    #[arg(long)]
    key_file: Option<std::path::PathBuf>,

    /// A trusted client, `keyId=path/to/public_key.pem`. Repeatable.
    #[arg(long = "trust", value_parser = parse_trust)]
    trusted: Vec<(String, std::path::PathBuf)>,
}

fn parse_trust(s: &str) -> Result<(String, std::path::PathBuf), String> {
    let (id, path) = s.split_once('=').ok_or_else(|| format!("expected `keyId=path`, got `{s}`"))?;
    Ok((id.to_string(), std::path::PathBuf::from(path)))
}

struct DemoAuthority {
    keys: StaticKeyPair,
    trusted: HashMap<String, PublicKey>,
}

impl ServerAuthority for DemoAuthority {
    fn static_keys(&self) -> &StaticKeyPair {
        &self.keys
    }

    fn sender_public_key(&self, key_id: &str) -> Option<PublicKey> {
        self.trusted.get(key_id).cloned()
    }

    fn authenticated(&self, login: &str, hostname: &str, software: &str) {
        log::info!("login ok: {login}@{hostname} ({software})");
    }
}

fn load_static_keys(path: Option<&std::path::Path>) -> Result<StaticKeyPair, Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            let pem = std::fs::read_to_string(p)?;
            Ok(StaticKeyPair::from_secret(private_key_from_pem(&pem)?))
        }
        None => {
            let keys = StaticKeyPair::generate();
            println!("No --key-file given; generated a fresh server identity:");
            println!("{}", private_key_to_pem(keys.secret())?);
            Ok(keys)
        }
    }
}

fn load_trusted(entries: &[(String, std::path::PathBuf)]) -> Result<HashMap<String, PublicKey>, Box<dyn std::error::Error>> {
    let mut map = HashMap::new();
    for (key_id, path) in entries {
        let pem = std::fs::read_to_string(path)?;
        map.insert(key_id.clone(), public_key_from_pem(&pem)?);
    }
    Ok(map)
}

fn serve_one(stream: std::net::TcpStream, authority: Arc<DemoAuthority>, cache: &'static SessionCache) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".to_string());
    let mut engine = MrpcEc::new_server(stream, authority, cache);
    if let Err(e) = engine.accept_login() {
        log::warn!("{peer}: login failed: {e}");
        return;
    }
    log::info!("{peer}: connected, session id = {}", engine.session.session_id);
    loop {
        match engine.recv::<MrpcPerson>() {
            Ok(req) => {
                log::debug!("{peer}: MrpcPerson{{name: {:?}}}", req.name);
                if let Err(e) = engine.send(&MrpcPerson { name: "Heinrich".to_string() }) {
                    log::warn!("{peer}: send failed: {e}");
                    return;
                }
            }
            Err(EngineError::Transport(_)) | Err(EngineError::Protocol(_)) => {
                log::info!("{peer}: disconnected");
                return;
            }
            Err(e) => {
                log::warn!("{peer}: {e}");
                return;
            }
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let keys = load_static_keys(args.key_file.as_deref())?;
    let trusted = load_trusted(&args.trusted)?;
    let authority = Arc::new(DemoAuthority { keys, trusted });
    let cache = mobs_mrpc::cache::global();

    let listener = TcpListener::bind(("0.0.0.0", args.port))?;
    log::info!("listening on 0.0.0.0:{}", args.port);

    for stream in listener.incoming() {
        let stream = stream?;
        let authority = Arc::clone(&authority);
        thread::spawn(move || serve_one(stream, authority, cache));
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    if let Err(e) = run(args) {
        eprintln!("mrpcsrv: {e}");
        std::process::exit(1);
    }
}
