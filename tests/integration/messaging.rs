use bytes::Bytes;

use crate::*;

#[tokio::test]
async fn whisper_reaches_only_its_target() -> Result<()> {
    let (mut a, mut b) = discovered_pair().await?;
    let (ida, idb) = (a.identity(), b.identity());

    a.whisper(idb, "hello B")?;
    let got = wait_for(&mut b, "whisper", |e| matches!(e, Event::Whisper { .. })).await?;
    assert_eq!(
        got,
        Event::Whisper {
            peer: ida,
            content: Bytes::from_static(b"hello B"),
        }
    );
    expect_none(&mut a, Duration::from_millis(200), |e| {
        matches!(e, Event::Whisper { .. })
    })
    .await?;

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn binary_content_is_untouched() -> Result<()> {
    let (a, mut b) = discovered_pair().await?;
    let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();

    a.whisper(b.identity(), payload.clone())?;
    match wait_for(&mut b, "whisper", |e| matches!(e, Event::Whisper { .. })).await? {
        Event::Whisper { content, .. } => assert_eq!(content.as_ref(), payload.as_slice()),
        other => bail!("unexpected {other:?}"),
    }

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn shout_is_delivered_once_to_members() -> Result<()> {
    let (mut a, mut b) = discovered_pair().await?;
    let (ida, idb) = (a.identity(), b.identity());

    b.join("G")?;
    wait_for(&mut a, "B joins G", |e| {
        *e == Event::Join { peer: idb, group: "G".into() }
    })
    .await?;

    a.shout("G", "hi")?;
    let expected = Event::Shout {
        peer: ida,
        group: "G".into(),
        content: Bytes::from_static(b"hi"),
    };
    assert_eq!(
        wait_for(&mut b, "shout", |e| matches!(e, Event::Shout { .. })).await?,
        expected
    );
    expect_none(&mut b, Duration::from_millis(300), |e| {
        matches!(e, Event::Shout { .. })
    })
    .await?;

    // Nobody is in "empty", so nothing is sent anywhere.
    a.shout("empty", "void")?;
    expect_none(&mut b, Duration::from_millis(200), |e| {
        matches!(e, Event::Shout { .. })
    })
    .await?;

    a.stop().await?;
    b.stop().await?;
    Ok(())
}
