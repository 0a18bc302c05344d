//! S5 (§8): a client may fetch the server's long-term public key before
//! ever starting a session.

mod common;

use mobs_crypto::ecdh::StaticKeyPair;
use mobs_crypto::keys::public_key_to_pem;
use mobs_mrpc::engine::{EngineState, MrpcEc};
use mobs_mrpc::Session;
use p256::PublicKey;

use common::{duplex_pair, leaked_cache, TestAuthority};

#[test]
fn s5_public_key_fetch_before_start_session() {
    let (client_sock, server_sock) = duplex_pair();

    let server_keys = StaticKeyPair::generate();
    let expected_pem = public_key_to_pem(&server_keys.secret().public_key()).unwrap();
    let client_pub = PublicKey::from_sec1_bytes(&StaticKeyPair::generate().public_der()).unwrap();

    let authority = TestAuthority::new(server_keys, "alice-key", client_pub);
    let cache = leaked_cache();

    let server_thread = std::thread::spawn(move || {
        let mut server = MrpcEc::new_server(server_sock, authority, cache);
        server.serve_public_key_request().unwrap();
    });

    let mut client = MrpcEc::new_client(client_sock, Session::new("test-server"));
    client.get_public_key().unwrap();
    let pem = client.recv_public_key().unwrap();

    assert_eq!(pem, expected_pem);
    assert_eq!(client.session.public_server_key, expected_pem);
    assert_eq!(client.state(), EngineState::Fresh);

    server_thread.join().unwrap();
}
