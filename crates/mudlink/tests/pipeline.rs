//! 端對端：伺服器資料經過輪詢、觸發器、正規化後送達接收端

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mudlink::{
    ChannelConsumer, Connection, ConnectionConfig, ConsumerEvent, MessageBody, Trigger,
    TriggerAction, TriggerEngine,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc::UnboundedReceiver;

fn config(encoding: &str) -> ConnectionConfig {
    ConnectionConfig {
        encoding: encoding.to_string(),
        poll_interval_ms: 10,
        ..ConnectionConfig::default()
    }
}

fn attach(
    config: ConnectionConfig,
    triggers: Arc<TriggerEngine>,
) -> (Connection, DuplexStream, UnboundedReceiver<ConsumerEvent>) {
    let (client, server) = tokio::io::duplex(4096);
    let (consumer, events) = ChannelConsumer::new();
    let connection = Connection::builder(config, Arc::new(consumer))
        .triggers(triggers)
        .attach("localhost", 4000, client)
        .unwrap();
    connection.start();
    (connection, server, events)
}

/// 收集文字直到一段時間沒有新訊息
async fn collect_text(events: &mut UnboundedReceiver<ConsumerEvent>) -> Vec<String> {
    let mut texts = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        if let ConsumerEvent::Message(message) = event {
            if let MessageBody::Text(text) = message.body {
                texts.push(text);
            }
        }
    }
    texts
}

#[tokio::test]
async fn test_escape_sequence_split_across_reads_is_stripped() {
    let (connection, mut server, mut events) = attach(config("utf-8"), Arc::new(TriggerEngine::new()));

    server.write_all(b"Hello \x1b[3").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.write_all(b"1mworld\x1b[0m\r\n").await.unwrap();

    let texts = collect_text(&mut events).await;
    let joined = texts.concat();
    assert_eq!(joined, "Hello world");
    assert!(texts.iter().all(|t| !t.contains('\x1b')));

    connection.disconnect().await;
}

#[tokio::test]
async fn test_line_split_across_reads_triggers_once() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let triggers = Arc::new(TriggerEngine::new());
    let seen = Arc::clone(&lines);
    triggers.add(
        Trigger::regex("room", r"^(.+) \[exits: (.+)\]$")
            .unwrap()
            .add_action(TriggerAction::callback(move |m| {
                seen.lock().unwrap().push(m.captures.clone());
                Ok(())
            })),
    );
    let (connection, mut server, mut events) = attach(config("utf-8"), triggers);

    server.write_all(b"Town Square [ex").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.write_all(b"its: north, south]\r\n").await.unwrap();

    collect_text(&mut events).await;
    assert_eq!(
        *lines.lock().unwrap(),
        vec![vec!["Town Square".to_string(), "north, south".to_string()]]
    );

    connection.disconnect().await;
}

#[tokio::test]
async fn test_big5_server() {
    let triggers = Arc::new(TriggerEngine::new());
    triggers.add(
        Trigger::regex("gold", r"獲得\s*(\d+)\s*金")
            .unwrap()
            .add_action(TriggerAction::Send("say 得到 $1".to_string())),
    );
    let (connection, mut server, mut events) = attach(config("big5"), triggers);

    let mut payload = mudlink::encoding::encode("你獲得 50 金幣", encoding_rs::BIG5);
    payload.extend_from_slice(b"\r\n");
    server.write_all(&payload).await.unwrap();

    let texts = collect_text(&mut events).await;
    assert_eq!(texts, vec!["你獲得 50 金幣"]);

    let mut expected = mudlink::encoding::encode("say 得到 50", encoding_rs::BIG5);
    expected.extend_from_slice(b"\r\n");
    let mut received = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(2), server.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, expected);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_remainder_reaches_triggers_on_disconnect() {
    let fired = Arc::new(Mutex::new(0));
    let triggers = Arc::new(TriggerEngine::new());
    let counter = Arc::clone(&fired);
    triggers.add(
        Trigger::regex("prompt", "^HP:")
            .unwrap()
            .add_action(TriggerAction::callback(move |_| {
                *counter.lock().unwrap() += 1;
                Ok(())
            })),
    );
    let (connection, mut server, mut events) = attach(config("utf-8"), triggers);

    server.write_all(b"HP: 100/100 > ").await.unwrap();
    let texts = collect_text(&mut events).await;
    assert_eq!(texts, vec!["HP: 100/100 > "]);
    assert_eq!(*fired.lock().unwrap(), 0);

    connection.disconnect().await;
    assert_eq!(*fired.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_unterminated_subnegotiation_does_not_swallow_output() {
    let config = ConnectionConfig {
        read_buffer_size: 64,
        ..config("utf-8")
    };
    let (connection, mut server, mut events) = attach(config, Arc::new(TriggerEngine::new()));

    server.write_all(&[255, 250, 201, b'x']).await.unwrap();
    server
        .write_all("You see a room.\r\n".repeat(20).as_bytes())
        .await
        .unwrap();

    let joined = collect_text(&mut events).await.join("\n");
    assert!(joined.contains("You see a room."));

    connection.disconnect().await;
}
