use std::{collections::BTreeMap, error::Error, fs, future::pending, path::Path, time::Duration};

use lib::protocol::{
    AdapterKey, FrameBuffer, Message, encode_frame, encrypt, read_frame, write_frame,
};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncWriteExt, DuplexStream, duplex},
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use w1remote_agent::{
    commands::CommandHandler,
    sensors::SensorBus,
    session::{SessionEnd, serve},
};

fn key() -> AdapterKey {
    AdapterKey::from_bytes([0x5a; 32])
}

fn spawn_session(root: &Path) -> (DuplexStream, JoinHandle<SessionEnd>) {
    let (controller, agent) = duplex(64 * 1024);
    let handler = CommandHandler::new("pi-test", SensorBus::new(root));
    let task = tokio::spawn(async move {
        let key = key();
        let shutdown = pending::<()>();
        tokio::pin!(shutdown);
        serve(agent, &key, &handler, shutdown).await
    });
    (controller, task)
}

async fn next_reply(
    controller: &mut DuplexStream,
    buffer: &mut FrameBuffer,
) -> Result<Option<Message>, Box<dyn Error>> {
    Ok(timeout(Duration::from_secs(2), read_frame(controller, buffer, &key())).await??)
}

fn add_sensor(root: &Path, address: &str, raw: &str) {
    fs::create_dir(root.join(address)).expect("device dir");
    fs::write(root.join(address).join("w1_slave"), raw).expect("status file");
}

#[tokio::test]
async fn pipelined_reads_are_all_answered_with_echoed_ts() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    add_sensor(dir.path(), "28-0001", "t=20000\n");
    add_sensor(dir.path(), "28-0002", "t=21000\n");
    let (mut controller, task) = spawn_session(dir.path());

    let mut burst = Vec::new();
    for (ts, address) in [(1, "28-0001"), (2, "28-0002"), (3, "28-0001")] {
        burst.extend(encode_frame(
            &Message::read_request(address, json!(ts)),
            &key(),
        )?);
    }
    controller.write_all(&burst).await?;

    let mut buffer = FrameBuffer::new();
    let mut replies = BTreeMap::new();
    for _ in 0..3 {
        match next_reply(&mut controller, &mut buffer).await? {
            Some(Message::Read {
                address: Some(address),
                ts: Value::Number(ts),
                raw: Some(raw),
            }) => {
                replies.insert(ts.as_u64().unwrap_or_default(), (address, raw));
            }
            other => panic!("expected read reply, got {:?}", other),
        }
    }

    assert_eq!(
        replies,
        BTreeMap::from([
            (1, ("28-0001".to_owned(), "t=20000\n".to_owned())),
            (2, ("28-0002".to_owned(), "t=21000\n".to_owned())),
            (3, ("28-0001".to_owned(), "t=20000\n".to_owned())),
        ])
    );

    controller.shutdown().await?;
    assert_eq!(next_reply(&mut controller, &mut buffer).await?, None);
    assert!(matches!(task.await?, SessionEnd::Closed));
    Ok(())
}

#[tokio::test]
async fn frames_split_into_single_bytes_are_reassembled() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (mut controller, task) = spawn_session(dir.path());

    let frame = encode_frame(
        &Message::ClientInfo {
            protocol_version: Some(1),
            system_id: None,
        },
        &key(),
    )?;
    for byte in &frame {
        controller.write_all(std::slice::from_ref(byte)).await?;
        controller.flush().await?;
    }

    let mut buffer = FrameBuffer::new();
    assert_eq!(
        next_reply(&mut controller, &mut buffer).await?,
        Some(Message::client_info("pi-test"))
    );

    drop(controller);
    assert!(matches!(task.await?, SessionEnd::Closed));
    Ok(())
}

#[tokio::test]
async fn read_without_address_sends_nothing() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (mut controller, task) = spawn_session(dir.path());

    let mut burst = encode_frame(
        &Message::Read {
            address: None,
            ts: json!(1),
            raw: None,
        },
        &key(),
    )?;
    controller.write_all(&burst).await?;
    burst = encode_frame(&Message::client_info("controller"), &key())?;
    controller.write_all(&burst).await?;

    let mut buffer = FrameBuffer::new();
    assert_eq!(
        next_reply(&mut controller, &mut buffer).await?,
        Some(Message::client_info("pi-test"))
    );

    controller.shutdown().await?;
    assert_eq!(next_reply(&mut controller, &mut buffer).await?, None);
    task.await?;
    Ok(())
}

#[tokio::test]
async fn read_of_missing_sensor_replies_with_empty_raw() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (mut controller, _task) = spawn_session(dir.path());

    write_frame(
        &mut controller,
        &Message::read_request("28-dead", json!("t1")),
        &key(),
    )
    .await?;

    let mut buffer = FrameBuffer::new();
    assert_eq!(
        next_reply(&mut controller, &mut buffer).await?,
        Some(Message::read_reply("28-dead", json!("t1"), ""))
    );
    Ok(())
}

#[tokio::test]
async fn search_lists_every_bus_master() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("w1_master_slaves"), "28-0001\n28-0002\n")?;
    fs::create_dir(dir.path().join("w1_bus_master1"))?;
    fs::write(
        dir.path().join("w1_bus_master1").join("w1_master_slaves"),
        "28-0003\n",
    )?;
    let (mut controller, _task) = spawn_session(dir.path());

    write_frame(
        &mut controller,
        &Message::search_request(json!(77), Some("pi-test".into())),
        &key(),
    )
    .await?;

    let mut buffer = FrameBuffer::new();
    match next_reply(&mut controller, &mut buffer).await? {
        Some(Message::Search {
            ts,
            system_id,
            addresses: Some(mut addresses),
        }) => {
            assert_eq!(ts, json!(77));
            assert_eq!(system_id.as_deref(), Some("pi-test"));
            addresses.sort();
            assert_eq!(addresses, vec!["28-0001", "28-0002", "28-0003"]);
        }
        other => panic!("expected search reply, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn failed_search_and_unknown_commands_keep_connection_open() -> Result<(), Box<dyn Error>>
{
    let dir = tempfile::tempdir()?;
    let (mut controller, task) = spawn_session(&dir.path().join("no-such-root"));

    write_frame(
        &mut controller,
        &Message::search_request(json!(1), None),
        &key(),
    )
    .await?;
    let mut unknown = encrypt(br#"{"cmd":"reboot","ts":2}"#, &key())?.into_bytes();
    unknown.push(b'\n');
    controller.write_all(&unknown).await?;
    write_frame(&mut controller, &Message::client_info("controller"), &key()).await?;

    let mut buffer = FrameBuffer::new();
    assert_eq!(
        next_reply(&mut controller, &mut buffer).await?,
        Some(Message::client_info("pi-test"))
    );
    assert!(!task.is_finished());
    Ok(())
}

#[tokio::test]
async fn undecryptable_frame_closes_the_session() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (mut controller, task) = spawn_session(dir.path());

    controller.write_all(b"this is not ciphertext\n").await?;

    let mut buffer = FrameBuffer::new();
    assert_eq!(next_reply(&mut controller, &mut buffer).await?, None);
    assert!(matches!(
        timeout(Duration::from_secs(2), task).await??,
        SessionEnd::Failed(_)
    ));
    Ok(())
}

#[tokio::test]
async fn shutdown_ends_the_session_and_closes_the_stream() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (mut controller, agent) = duplex(64 * 1024);
    let handler = CommandHandler::new("pi-test", SensorBus::new(dir.path()));
    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let key = key();
        let shutdown = async move {
            let _ = rx.await;
        };
        tokio::pin!(shutdown);
        serve(agent, &key, &handler, shutdown).await
    });

    let _ = tx.send(());
    assert!(matches!(
        timeout(Duration::from_secs(2), task).await??,
        SessionEnd::Shutdown
    ));

    let mut buffer = FrameBuffer::new();
    assert_eq!(next_reply(&mut controller, &mut buffer).await?, None);
    Ok(())
}

#[tokio::test]
async fn frame_without_cmd_is_ignored_and_connection_stays_open() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (mut controller, task) = spawn_session(dir.path());

    let mut burst = encrypt(br#"{"ts":1}"#, &key())?.into_bytes();
    burst.push(b'\n');
    let mut odd_types = encrypt(br#"{"cmd":"read","address":123,"ts":2}"#, &key())?.into_bytes();
    odd_types.push(b'\n');
    burst.extend(odd_types);
    burst.extend(encode_frame(&Message::client_info("controller"), &key())?);
    controller.write_all(&burst).await?;

    let mut buffer = FrameBuffer::new();
    assert_eq!(
        next_reply(&mut controller, &mut buffer).await?,
        Some(Message::client_info("pi-test"))
    );

    controller.shutdown().await?;
    assert_eq!(next_reply(&mut controller, &mut buffer).await?, None);
    assert!(matches!(task.await?, SessionEnd::Closed));
    Ok(())
}

#[tokio::test]
async fn client_info_with_unparsable_version_is_still_answered() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (mut controller, _task) = spawn_session(dir.path());

    let mut frame =
        encrypt(br#"{"cmd":"clientInfo","protocolVersion":"2.0"}"#, &key())?.into_bytes();
    frame.push(b'\n');
    controller.write_all(&frame).await?;

    let mut buffer = FrameBuffer::new();
    assert_eq!(
        next_reply(&mut controller, &mut buffer).await?,
        Some(Message::client_info("pi-test"))
    );
    Ok(())
}

#[tokio::test]
async fn commands_before_a_bad_frame_in_the_same_chunk_are_answered() -> Result<(), Box<dyn Error>>
{
    let dir = tempfile::tempdir()?;
    add_sensor(dir.path(), "28-0001", "t=20000\n");
    let (mut controller, task) = spawn_session(dir.path());

    let mut burst = encode_frame(&Message::read_request("28-0001", json!(1)), &key())?;
    burst.extend_from_slice(b"garbage\n");
    controller.write_all(&burst).await?;

    let mut buffer = FrameBuffer::new();
    assert_eq!(
        next_reply(&mut controller, &mut buffer).await?,
        Some(Message::read_reply("28-0001", json!(1), "t=20000\n"))
    );
    assert_eq!(next_reply(&mut controller, &mut buffer).await?, None);
    assert!(matches!(
        timeout(Duration::from_secs(2), task).await??,
        SessionEnd::Failed(_)
    ));
    Ok(())
}
