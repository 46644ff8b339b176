#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use plexmux::engine::{connect, MuxConfig};
use plexmux::frame::{encode_frame, Frame, Origin, DEFAULT_MAX_PAYLOAD};
use plexmux::transport::Endpoint;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/plexmux-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// Block until something accepts on `path`. The probe connection is closed
/// immediately; servers treat it as a peer that opened no channels.
fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("server did not start listening on {}", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_server(args: &[&str], path: &Path, stdout: Stdio) -> Child {
    let child = Command::new(env!("CARGO_BIN_EXE_plexmux"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .arg(path)
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()
        .expect("server command should start");
    wait_for_socket(path, Duration::from_secs(3));
    child
}

fn stop(mut child: Child, dir: &Path) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn send_wait_round_trips_through_echo_server() {
    let dir = unique_temp_dir("echo");
    let sock_path = dir.join("echo.sock");
    let server = spawn_server(&["echo"], &sock_path, Stdio::null());

    let output = Command::new(env!("CARGO_BIN_EXE_plexmux"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("raw")
        .arg("send")
        .arg(&sock_path)
        .arg("--data")
        .arg("ping over plexmux")
        .arg("--wait")
        .output()
        .expect("send should run");

    assert!(output.status.success(), "send failed: {output:?}");
    assert_eq!(output.stdout, b"ping over plexmux");

    stop(server, &dir);
}

#[test]
fn listen_prints_named_channel_as_json() {
    let dir = unique_temp_dir("listen");
    let sock_path = dir.join("listen.sock");
    let listener = spawn_server(
        &["--format", "json", "listen", "--count", "1"],
        &sock_path,
        Stdio::piped(),
    );

    let status = Command::new(env!("CARGO_BIN_EXE_plexmux"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg(&sock_path)
        .arg("--name")
        .arg("greeting")
        .arg("--json")
        .arg(r#"{"hello":"world"}"#)
        .status()
        .expect("send should run");
    assert!(status.success());

    let output = listener
        .wait_with_output()
        .expect("listen should exit after one channel");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().expect("one record should be printed");
    let record: serde_json::Value = serde_json::from_str(line).expect("record should be json");
    assert_eq!(record["name"], "greeting");
    assert_eq!(record["payload"], r#"{"hello":"world"}"#);
    assert_eq!(record["initiator"], false);
    assert!(record["peer"].as_str().is_some_and(|peer| peer.starts_with("peer-")));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_missing_socket_exits_with_transport_code() {
    let dir = unique_temp_dir("missing");
    let output = Command::new(env!("CARGO_BIN_EXE_plexmux"))
        .arg("send")
        .arg(dir.join("nobody.sock"))
        .arg("--data")
        .arg("lost")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));

    let _ = std::fs::remove_dir_all(&dir);
}

fn write_capture(path: &Path, frames: &[Frame]) {
    let mut buf = BytesMut::new();
    for frame in frames {
        encode_frame(frame, &mut buf, DEFAULT_MAX_PAYLOAD).expect("frame should encode");
    }
    let mut file = std::fs::File::create(path).expect("capture should be writable");
    file.write_all(&buf).expect("capture should be written");
}

#[test]
fn dump_prints_each_frame() {
    let dir = unique_temp_dir("dump");
    let capture = dir.join("session.bin");
    write_capture(
        &capture,
        &[
            Frame::new_stream(0, "chat"),
            Frame::message(0, Origin::Opener, "hi"),
            Frame::message(0, Origin::Acceptor, "hi back"),
            Frame::close(0, Origin::Opener),
        ],
    );

    let output = Command::new(env!("CARGO_BIN_EXE_plexmux"))
        .arg("--format")
        .arg("json")
        .arg("dump")
        .arg(&capture)
        .output()
        .expect("dump should run");
    assert!(output.status.success());

    let kinds: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("line should be json");
            value["kind"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(kinds, ["NEW", "IN_MESSAGE", "OUT_MESSAGE", "IN_CLOSE"]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn dump_of_truncated_capture_exits_60() {
    let dir = unique_temp_dir("dump-truncated");
    let capture = dir.join("cut.bin");
    // NEW for stream 0, then a MESSAGE header that promises 5 bytes and has 2.
    std::fs::write(&capture, [0x00, 0x00, 0x01, 0x05, b'h', b'e'])
        .expect("capture should be written");

    let output = Command::new(env!("CARGO_BIN_EXE_plexmux"))
        .arg("--format")
        .arg("pretty")
        .arg("dump")
        .arg(&capture)
        .output()
        .expect("dump should run");

    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stdout).contains("kind=NEW"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn echo_server_honours_message_size_limit() {
    let dir = unique_temp_dir("echo-limit");
    let sock_path = dir.join("echo.sock");
    let server = spawn_server(
        &["--max-message-size", "8", "echo"],
        &sock_path,
        Stdio::null(),
    );

    let config = MuxConfig::default().with_max_message_size(8);
    let mux = connect(&Endpoint::Unix(sock_path.clone()), config)
        .await
        .expect("client should connect");

    let payload = Bytes::from((0..100u8).collect::<Vec<_>>());
    let mut channel = mux.new_stream().expect("channel should open");
    channel.write(payload.clone()).expect("write should queue");
    channel.finish().expect("finish should queue");

    let echoed = tokio::time::timeout(Duration::from_secs(5), channel.read_to_end())
        .await
        .expect("echo should arrive")
        .expect("channel should end cleanly");
    assert_eq!(echoed, payload);

    mux.close();
    assert!(mux.closed().await.is_ok());
    stop(server, &dir);
}
