//! Session teardown paths: QUIT, EOF, oversize input, and the
//! post-registration NICK-change relay.

mod common;

use common::{Client, prefix_of, start_server};

#[tokio::test]
async fn quit_relays_once_and_empties_channels() {
    let (addr, _state) = start_server().await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    // Two shared channels; the QUIT relay still arrives exactly once.
    a.register_and_join("alice", "#one").await;
    a.send("JOIN #two").await;
    a.expect(" 366 ").await;
    b.register_and_join("bob", "#one").await;
    b.send("JOIN #two").await;
    b.expect(" 366 ").await;
    // Drain bob's two JOIN relays from alice's stream.
    a.expect("JOIN #two").await;

    b.send("QUIT :gone").await;
    let quit = a.expect("QUIT").await;
    assert_eq!(quit, format!(":{} QUIT :gone", prefix_of("bob")));
    a.expect_silence().await;

    // Bob's connection is closed by the server.
    b.expect_close().await;
}

#[tokio::test]
async fn quit_reason_defaults() {
    let (addr, _state) = start_server().await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    a.register_and_join("alice", "#room").await;
    b.register_and_join("bob", "#room").await;
    a.expect("JOIN").await;

    b.send("QUIT").await;
    let quit = a.expect("QUIT").await;
    assert_eq!(quit, format!(":{} QUIT :Client Quit", prefix_of("bob")));
}

#[tokio::test]
async fn quit_frees_the_nickname_and_channel() {
    let (addr, _state) = start_server().await;
    let mut a = Client::connect(addr).await;
    a.register_and_join("alice", "#room").await;
    a.send("QUIT :done").await;
    a.expect_close().await;

    // Both the nick and the (now empty) channel are reusable.
    let mut b = Client::connect(addr).await;
    b.register("alice").await;
    b.send("JOIN #room").await;
    b.expect(" 366 ").await;
}

#[tokio::test]
async fn eof_propagates_like_quit() {
    let (addr, _state) = start_server().await;
    let mut a = Client::connect(addr).await;
    let b = Client::connect(addr).await;
    a.register_and_join("alice", "#room").await;
    {
        let mut b = b;
        b.register_and_join("bob", "#room").await;
        a.expect("JOIN").await;
        // b drops here: the socket closes without a QUIT command.
    }
    let quit = a.expect("QUIT").await;
    assert!(quit.starts_with(&format!(":{} QUIT", prefix_of("bob"))), "got: {quit}");
}

#[tokio::test]
async fn oversize_line_kills_the_session() {
    let (addr, _state) = start_server().await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    a.register_and_join("alice", "#room").await;
    b.register_and_join("bob", "#room").await;
    a.expect("JOIN").await;

    // 600 bytes with no terminator: fatal for bob, relayed as a QUIT.
    b.send_raw(&[b'a'; 600]).await;
    let quit = a.expect("QUIT").await;
    assert!(quit.starts_with(&format!(":{} QUIT", prefix_of("bob"))), "got: {quit}");
    b.expect_close().await;
}

#[tokio::test]
async fn long_but_terminated_lines_still_parse() {
    let (addr, _state) = start_server().await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    a.register_and_join("alice", "#room").await;
    b.register_and_join("bob", "#room").await;
    a.expect("JOIN").await;

    // A 450-byte text fits the 512-byte frame and is relayed verbatim.
    let text = "x".repeat(450);
    b.send(&format!("PRIVMSG #room :{text}")).await;
    let got = a.expect("PRIVMSG").await;
    assert!(got.ends_with(&text), "relay truncated: {} bytes", got.len());
}

#[tokio::test]
async fn nick_change_is_announced_to_registered_sessions() {
    let (addr, _state) = start_server().await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    let mut c = Client::connect(addr).await;
    a.register("alice").await;
    // b shares no channel with alice and still hears the rename.
    b.register("bob").await;
    c.send("NICK watcher").await; // never registers

    a.send("NICK alicia").await;
    let seen = b.expect("NICK").await;
    assert_eq!(seen, format!(":{} NICK alicia", prefix_of("alice")));

    // The renaming session itself gets no confirmation, and neither do
    // unregistered sessions.
    a.expect_silence().await;
    c.expect_silence().await;

    // The old nick is free again; the new one is taken.
    let mut d = Client::connect(addr).await;
    d.register("alice").await;
    d.send("NICK alicia").await;
    assert!(d.recv().await.contains(" 433 "));
}

#[tokio::test]
async fn pre_registration_nick_change_is_silent() {
    let (addr, _state) = start_server().await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    b.register("bob").await;

    a.send("NICK early").await;
    a.send("NICK earlier").await;
    b.expect_silence().await;
}

#[tokio::test]
async fn teardown_clears_invites() {
    let (addr, state) = start_server().await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    a.register_and_join("alice", "#club").await;
    b.register("bob").await;
    common::grant_op(&state, "#club", "alice");

    a.send("MODE #club +i").await;
    a.expect("MODE").await;
    a.send("INVITE bob #club").await;
    b.expect("INVITE").await;

    // Bob disconnects without using the invite; a new session under the
    // same nick must not inherit it.
    b.send("QUIT :later").await;
    b.expect_close().await;

    let mut b2 = Client::connect(addr).await;
    b2.register("bob").await;
    b2.send("JOIN #club").await;
    assert!(b2.recv().await.contains(" 473 "));
}
