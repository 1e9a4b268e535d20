use std::time::Duration;

use chw_client::{Client, ClientConfig, ClientError, Setting};
use chw_common::ErrorClass;
use tokio::net::TcpListener;

async fn spawn_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

async fn spawn_closing_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    addr
}

async fn spawn_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(stream);
            });
        }
    });

    addr
}

fn client_for(addr: String) -> Client {
    let config = ClientConfig {
        addr,
        max_pool_size: 2,
        segment_size: 8,
        connect_timeout_ms: Some(1000),
        read_timeout_ms: Some(1000),
        write_timeout_ms: Some(1000),
        settings: vec![Setting {
            name: "max_threads".to_string(),
            value: "8".to_string(),
        }],
        ..ClientConfig::default()
    };
    Client::with_config(config).expect("client")
}

#[tokio::test]
async fn framed_round_trip_through_echo() -> anyhow::Result<()> {
    let client = client_for(spawn_echo_server().await);
    let mut conn = client.rent().await?;

    conn.write_frame(|out| {
        out.write_slice(&11u32.to_le_bytes());
        out.write_slice(b"hello world");
        Ok(())
    })?;
    assert_eq!(conn.send().await?, 15);

    let header = conn.read_exact(4).await?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let body = conn.read_exact(len).await?;
    assert_eq!(&body[..], b"hello world");
    assert!(conn.inbound().is_empty());

    assert_eq!(conn.settings().get("MAX_THREADS").map(String::as_str), Some("8"));
    drop(conn);
    assert_eq!(client.status().idle, 1);
    Ok(())
}

#[tokio::test]
async fn failed_encoder_leaves_nothing_to_send() -> anyhow::Result<()> {
    let client = client_for(spawn_echo_server().await);
    let mut conn = client.rent().await?;

    conn.write_frame(|out| {
        out.write_slice(b"complete");
        Ok(())
    })?;
    let err = conn
        .write_frame(|out| {
            out.write_slice(b"half a frame that spans segments");
            Err(ClientError::InvalidConfig("value too large".to_string()))
        })
        .expect_err("encoder fails");
    assert!(matches!(err, ClientError::InvalidConfig(_)));
    assert_eq!(conn.outbound().pending_len(), 0);

    assert_eq!(conn.send().await?, 8);
    let echoed = conn.read_exact(8).await?;
    assert_eq!(&echoed[..], b"complete");
    assert!(!conn.is_broken());
    Ok(())
}

#[tokio::test]
async fn peer_close_discards_the_connection() {
    let client = client_for(spawn_closing_server().await);
    let mut conn = client.rent().await.expect("rent");

    let err = conn.read_exact(1).await.expect_err("peer closed");
    assert_eq!(err.class(), ErrorClass::Resource);
    assert!(conn.is_broken());

    drop(conn);
    let status = client.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.empty, 2);
}

#[tokio::test]
async fn read_timeout_breaks_the_connection() {
    let config = ClientConfig {
        addr: spawn_silent_server().await,
        read_timeout_ms: Some(50),
        ..ClientConfig::default()
    };
    let client = Client::with_config(config).expect("client");
    let mut conn = client.rent().await.expect("rent");

    let err = conn.receive().await.expect_err("timeout");
    match err {
        ClientError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::TimedOut),
        other => panic!("unexpected error: {other}"),
    }
    assert!(conn.is_broken());
}

#[tokio::test]
async fn refused_connect_frees_the_slot() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let client = client_for(addr);
    let err = client.rent().await.expect_err("refused");
    assert_eq!(err.class(), ErrorClass::Resource);
    assert_eq!(client.status().empty, 2);
}

#[test]
fn client_exposes_validated_settings() {
    let client = client_for("127.0.0.1:9".to_string());
    assert_eq!(client.settings().index_of_key("Max_Threads"), Some(0));
    assert_eq!(client.status().empty, 2);

    client.dispose();
    assert!(client.pool().is_disposed());
}
