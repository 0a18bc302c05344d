//! S1/S2 (§8): a clean login round-trips an application object; a login
//! signed under a `keyId` the server cannot map to the presented key is
//! rejected and never reaches `Connected`.

mod common;

use mobs_crypto::ecdh::StaticKeyPair;
use mobs_mrpc::engine::{EngineState, MrpcEc};
use mobs_mrpc::Session;
use p256::PublicKey;

use common::{duplex_pair, leaked_cache, MrpcPerson, TestAuthority};

#[test]
fn s1_handshake_success_round_trips_application_object() {
    let (client_sock, server_sock) = duplex_pair();

    let server_keys = StaticKeyPair::generate();
    let server_pub_der = server_keys.public_der();
    let client_keys = StaticKeyPair::generate();
    let client_pub = PublicKey::from_sec1_bytes(&client_keys.public_der()).unwrap();

    let authority = TestAuthority::new(server_keys, "alice-key", client_pub);
    let cache = leaked_cache();

    let server_thread = std::thread::spawn(move || {
        let mut server = MrpcEc::new_server(server_sock, authority, cache);
        server.accept_login().unwrap();
        let hello: MrpcPerson = server.recv().unwrap();
        assert_eq!(hello.name, "");
        server.send(&MrpcPerson { name: "Heinrich".to_string() }).unwrap();
    });

    let mut client = MrpcEc::new_client(client_sock, Session::new("test-server"));
    client
        .start_session("alice-key", "alice", "test-suite", "localhost", client_keys.secret(), &server_pub_der)
        .unwrap();
    client.finish_session().unwrap();
    assert_eq!(client.state(), EngineState::Connected);

    client.send(&MrpcPerson { name: String::new() }).unwrap();
    let reply: MrpcPerson = client.recv().unwrap();
    assert_eq!(reply.name, "Heinrich");

    client.close().unwrap();
    server_thread.join().unwrap();
}

#[test]
fn s2_auth_failure_is_rejected_before_connected() {
    let (client_sock, server_sock) = duplex_pair();

    let server_keys = StaticKeyPair::generate();
    let server_pub_der = server_keys.public_der();
    let client_keys = StaticKeyPair::generate();
    // The authority only ever recognizes `stranger_pub` under this keyId, so
    // the client's real signature never verifies.
    let stranger_pub = PublicKey::from_sec1_bytes(&StaticKeyPair::generate().public_der()).unwrap();

    let authority = TestAuthority::new(server_keys, "alice-key", stranger_pub);
    let cache = leaked_cache();

    let server_thread = std::thread::spawn(move || {
        let mut server = MrpcEc::new_server(server_sock, authority, cache);
        server.accept_login()
    });

    let mut client = MrpcEc::new_client(client_sock, Session::new("test-server"));
    client
        .start_session("alice-key", "alice", "test-suite", "localhost", client_keys.secret(), &server_pub_der)
        .unwrap();

    assert!(client.finish_session().is_err());
    assert_eq!(client.session.session_id, 0);
    assert!(server_thread.join().unwrap().is_err());
    assert!(cache.is_empty());
}
