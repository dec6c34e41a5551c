use crate::*;

#[tokio::test]
async fn join_and_leave_are_seen_by_peers() -> Result<()> {
    let (mut a, b) = discovered_pair().await?;
    let idb = b.identity();

    b.join("G")?;
    wait_for(&mut a, "B joins G", |e| {
        *e == Event::Join { peer: idb, group: "G".into() }
    })
    .await?;
    assert_eq!(b.own_groups().await?, vec!["G".to_string()]);

    b.leave("G")?;
    wait_for(&mut a, "B leaves G", |e| {
        *e == Event::Leave { peer: idb, group: "G".into() }
    })
    .await?;
    assert!(b.own_groups().await?.is_empty());
    // Groups are never forgotten, even when empty.
    assert_eq!(a.peer_groups().await?, vec!["G".to_string()]);

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn groups_joined_before_discovery_arrive_in_hello() -> Result<()> {
    let port = discovery_port();
    let mut config = test_config(port);
    config.node.groups = vec!["early".into()];
    let a = Node::start(config).await?;
    let mut b = start_node(port).await?;
    let ida = a.identity();

    wait_for(&mut b, "A in early", |e| {
        *e == Event::Join { peer: ida, group: "early".into() }
    })
    .await?;

    a.stop().await?;
    b.stop().await?;
    Ok(())
}
