use std::net::UdpSocket;

use zre_core::{Beacon, NodeIdentity};

use crate::*;

#[tokio::test]
async fn two_nodes_discover_each_other() -> Result<()> {
    let (a, b) = discovered_pair().await?;
    assert_eq!(a.peers().await?, vec![b.identity()]);
    assert_eq!(b.peers().await?, vec![a.identity()]);
    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn headers_travel_in_hello() -> Result<()> {
    let port = discovery_port();
    let a = start_node(port).await?;
    a.set_header("X-HELLO", "world")?;
    let mut b = start_node(port).await?;
    let ida = a.identity();
    wait_for(&mut b, "B sees A enter", |e| *e == Event::Enter { peer: ida }).await?;

    // ENTER can come from A's beacon before A's HELLO has been read.
    let deadline = Instant::now() + WAIT;
    loop {
        if b.peer_header(ida, "X-HELLO").await?.as_deref() == Some("world") {
            break;
        }
        if Instant::now() > deadline {
            bail!("header never arrived");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(b.peer_header(ida, "X-MISSING").await?, None);

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn malformed_datagrams_are_ignored() -> Result<()> {
    let port = discovery_port();
    let mut a = start_node(port).await?;
    let dest = ("127.0.0.1", port);
    let sender = UdpSocket::bind("127.0.0.1:0")?;

    let mut wrong_version = Beacon::new(NodeIdentity::generate(), 50000).encode();
    wrong_version[3] = 0x02;
    let mut wrong_tag = Beacon::new(NodeIdentity::generate(), 50000).encode();
    wrong_tag[0] = b'X';
    sender.send_to(b"not a beacon", dest)?;
    sender.send_to(&wrong_version, dest)?;
    sender.send_to(&wrong_tag, dest)?;
    sender.send_to(&[0u8; 64], dest)?;

    expect_none(&mut a, Duration::from_millis(500), |_| true).await?;
    assert!(a.peers().await?.is_empty());
    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn beacon_for_a_dead_endpoint_enters_then_exits() -> Result<()> {
    let port = discovery_port();
    let mut a = start_node(port).await?;

    // Nothing listens on this port once the listener is dropped.
    let dead_port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
    let ghost = NodeIdentity::generate();
    UdpSocket::bind("127.0.0.1:0")?.send_to(&Beacon::new(ghost, dead_port).encode(), ("127.0.0.1", port))?;

    wait_for(&mut a, "ghost enters", |e| *e == Event::Enter { peer: ghost }).await?;
    wait_for(&mut a, "ghost exits", |e| *e == Event::Exit { peer: ghost }).await?;
    assert!(a.peers().await?.is_empty());
    a.stop().await?;
    Ok(())
}
