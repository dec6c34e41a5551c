use crate::*;

#[tokio::test]
async fn stopped_peer_expires() -> Result<()> {
    let (mut a, b) = discovered_pair().await?;
    let idb = b.identity();
    b.stop().await?;

    wait_for(&mut a, "B exits", |e| *e == Event::Exit { peer: idb }).await?;
    assert!(a.peers().await?.is_empty());
    a.stop().await?;
    Ok(())
}

#[tokio::test]
async fn live_peer_does_not_expire() -> Result<()> {
    let (mut a, b) = discovered_pair().await?;
    // Several expiry periods with beacons flowing.
    expect_none(&mut a, Duration::from_millis(3000), |e| {
        matches!(e, Event::Exit { .. })
    })
    .await?;
    assert_eq!(a.peers().await?, vec![b.identity()]);
    a.stop().await?;
    b.stop().await?;
    Ok(())
}
