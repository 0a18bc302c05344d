//! `mrpccli` — the reference MRPC-EC stress client (§6.3): logs in once,
//! then fires a configurable number of `MrpcPerson` round trips back to
//! back, reporting a simple summary.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use clap::Parser;
use mobs_crypto::ecdh::StaticKeyPair;
use mobs_crypto::keys::{private_key_from_pem, public_key_from_pem};
use mobs_mrpc::{MrpcEc, Session};
use mobs_types::{FieldDescriptor, FieldKind, Record, ScalarHint, Traverse, Value};

const NAME: FieldDescriptor = FieldDescriptor {
    name: "name",
    alt_name: None,
    key_ordinal: None,
    as_attribute: false,
    nullable: false,
    encrypted: false,
    kind: FieldKind::Scalar(ScalarHint::PlainString),
};

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

/// Log in to a running `mrpcsrv` and fire repeated `MrpcPerson` calls.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server port (connects to `127.0.0.1:PORT`, or `--host` if given).
    #[arg(short = 'P', long)]
    port: u16,

    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Verbose logging (`debug` instead of `info`).
    #[arg(short, long)]
    verbose: bool,

    /// Retry connecting until the server accepts the handshake, instead of
    /// failing on the first refused/rejected attempt.
    #[arg(short, long)]
    wait: bool,

    /// `keyId` the server is expected to recognize this client's public key
    /// under.
    #[arg(long)]
    key_id: String,

    /// PEM file holding this client's static private key.
    #[arg(long)]
    key_file: std::path::PathBuf,

    /// PEM file holding the server's static public key.
    #[arg(long)]
    server_key_file: std::path::PathBuf,

    /// Number of `MrpcPerson` round trips to send.
    #[arg(long, default_value_t = 100)]
    count: u32,
}

fn connect_and_login(args: &Args) -> Result<MrpcEc<TcpStream>, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", args.host, args.port);
    let client_key = private_key_from_pem(&std::fs::read_to_string(&args.key_file)?)?;
    let server_pub = public_key_from_pem(&std::fs::read_to_string(&args.server_key_file)?)?;
    let server_pub_der = {
        use p256::elliptic_curve::sec1::ToEncodedPoint;
        server_pub.to_encoded_point(false).as_bytes().to_vec()
    };

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = TcpStream::connect(&addr).map_err(|e| Box::<dyn std::error::Error>::from(e)).and_then(|stream| {
            let mut client = MrpcEc::new_client(stream, Session::new(addr.clone()));
            client.start_session(&args.key_id, "stress", "mrpccli/0.1", "localhost", &client_key, &server_pub_der)?;
            client.finish_session()?;
            Ok(client)
        });
        match outcome {
            Ok(client) => return Ok(client),
            Err(e) if args.wait => {
                log::warn!("connect attempt {attempt} failed: {e}; retrying");
                std::thread::sleep(Duration::from_millis(500));
            }
            Err(e) => return Err(e),
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect_and_login(&args)?;
    log::info!("logged in, session id = {}", client.session.session_id);

    let start = Instant::now();
    for i in 0..args.count {
        client.send(&MrpcPerson { name: format!("stress-{i}") })?;
        let _reply: MrpcPerson = client.recv()?;
    }
    let elapsed = start.elapsed();
    println!(
        "{} round trips in {:.3}s ({:.1}/s)",
        args.count,
        elapsed.as_secs_f64(),
        args.count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    client.close()?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    if let Err(e) = run(args) {
        eprintln!("mrpccli: {e}");
        std::process::exit(1);
    }
}
