//! MRPC-EC handshake + one encrypted round trip against a running `mrpcsrv`.
//!
//! # What this does
//!
//! 1. TCP connect to the server address (first CLI argument, default
//!    `127.0.0.1:4433`)
//! 2. Generate a fresh client identity and print it — register its `keyId`
//!    and public key with the server operator before running again, since
//!    the handshake will otherwise fail at the signature check
//! 3. Fetch the server's long-term public key via `MrpcGetPublickey`
//! 4. Run the full ECDH login (`start_session`/`finish_session`)
//! 5. Send one `MrpcPerson` and print the reply
//!
//! # Run
//! ```
//! cargo run -p mobs-connect -- 127.0.0.1:4433
//! ```

use std::net::TcpStream;

use mobs_crypto::ecdh::StaticKeyPair;
use mobs_crypto::keys::private_key_to_pem;
use mobs_mrpc::{MrpcEc, Session};
use mobs_types::{FieldDescriptor, FieldKind, Record, ScalarHint, Traverse, Value};

const DEFAULT_ADDR: &str = "127.0.0.1:4433";
const DEMO_KEY_ID: &str = "demo-client";

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

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());

    println!("Connecting to {addr} …");
    let stream = TcpStream::connect(&addr)?;
    println!("✓ TCP connected");

    let client_keys = StaticKeyPair::generate();
    println!("\nGenerated a fresh client identity (keyId = `{DEMO_KEY_ID}`):");
    println!("{}", private_key_to_pem(client_keys.secret())?);
    println!("Register the matching public key with the server before this handshake will succeed.");

    let mut client = MrpcEc::new_client(stream, Session::new(addr.clone()));

    println!("\n[Public key] Fetching the server's long-term key …");
    client.get_public_key()?;
    let server_pem = client.recv_public_key()?;
    println!("  ✓ server public key:\n{server_pem}");
    let server_pub = mobs_crypto::keys::public_key_from_pem(&server_pem)?;
    let server_pub_der = {
        use p256::elliptic_curve::sec1::ToEncodedPoint;
        server_pub.to_encoded_point(false).as_bytes().to_vec()
    };

    println!("[Login] Authenticating as `{DEMO_KEY_ID}` …");
    client.start_session(
        DEMO_KEY_ID,
        "demo-user",
        "mobs-connect/0.1",
        hostname(),
        client_keys.secret(),
        &server_pub_der,
    )?;
    client.finish_session()?;
    println!("  ✓ logged in, session id = {}", client.session.session_id);

    println!("\n[Call] Sending MrpcPerson{{name: \"\"}} …");
    client.send(&MrpcPerson { name: String::new() })?;
    let reply: MrpcPerson = client.recv()?;
    println!("  ✓ reply: MrpcPerson{{name: {:?}}}", reply.name);

    client.close()?;
    println!("\n✓ Full MRPC-EC flow complete!");
    Ok(())
}

fn hostname() -> &'static str {
    "localhost"
}
