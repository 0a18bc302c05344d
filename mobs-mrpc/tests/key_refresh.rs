//! S4 (§8): after a normal round-trip the client proactively rekeys; one
//! further application object succeeds under the new key, the server's
//! `key_changed` hook fires exactly once, and the old key is no longer
//! accepted.

mod common;

use mobs_crypto::ecdh::StaticKeyPair;
use mobs_mrpc::engine::MrpcEc;
use mobs_mrpc::Session;
use p256::PublicKey;

use common::{duplex_pair, leaked_cache, MrpcPerson, TestAuthority};

#[test]
fn s4_key_refresh_invalidates_the_old_key() {
    let (client_sock, server_sock) = duplex_pair();

    let server_keys = StaticKeyPair::generate();
    let server_pub_der = server_keys.public_der();
    let client_keys = StaticKeyPair::generate();
    let client_pub = PublicKey::from_sec1_bytes(&client_keys.public_der()).unwrap();

    let authority = TestAuthority::new(server_keys, "alice-key", client_pub);
    let cache = leaked_cache();

    let authority_for_engine = std::sync::Arc::clone(&authority);
    let server_thread = std::thread::spawn(move || {
        let mut server = MrpcEc::new_server(server_sock, authority_for_engine, cache);
        server.accept_login().unwrap();

        let first: MrpcPerson = server.recv().unwrap();
        assert_eq!(first.name, "");
        server.send(&MrpcPerson { name: "Heinrich".to_string() }).unwrap();

        // Applies the refresh transparently inside `recv`.
        let second: MrpcPerson = server.recv().unwrap();
        assert_eq!(second.name, "Goethe");
        assert_eq!(authority.key_changed_count(), 1);
        authority
    });

    let mut client = MrpcEc::new_client(client_sock, Session::new("test-server"));
    client
        .start_session("alice-key", "alice", "test-suite", "localhost", client_keys.secret(), &server_pub_der)
        .unwrap();
    client.finish_session().unwrap();

    client.send(&MrpcPerson { name: String::new() }).unwrap();
    let _reply: MrpcPerson = client.recv().unwrap();
    let old_key = client.session.session_key.clone();

    client.client_refresh_key(&server_pub_der).unwrap();
    client.send(&MrpcPerson { name: "Goethe".to_string() }).unwrap();

    let authority = server_thread.join().unwrap();
    assert_eq!(authority.key_changed_count(), 1);
    assert_ne!(client.session.session_key, old_key, "refresh must install a different key");
}
