use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use plexmux_frame::{Frame, FrameKind};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A channel's complete inbound payload, as reported by `listen` and `send --wait`.
#[derive(Debug, Serialize)]
pub struct ChannelRecord {
    pub stream_id: u64,
    pub name: String,
    pub initiator: bool,
    pub peer: String,
    pub payload_size: usize,
    pub payload: String,
    pub timestamp: String,
    #[serde(skip)]
    pub data: Bytes,
}

impl ChannelRecord {
    pub fn new(stream_id: u64, name: &[u8], initiator: bool, peer: &str, data: Bytes) -> Self {
        Self {
            stream_id,
            name: String::from_utf8_lossy(name).into_owned(),
            initiator,
            peer: peer.to_string(),
            payload_size: data.len(),
            payload: payload_preview(&data),
            timestamp: now_unix_seconds(),
            data,
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    stream_id: u64,
    tag: u8,
    kind: &'a str,
    payload_size: usize,
    payload: String,
}

impl<'a> FrameOutput<'a> {
    fn new(frame: &'a Frame) -> Self {
        Self {
            stream_id: frame.stream_id,
            tag: frame.tag(),
            kind: frame.tag_name(),
            payload_size: frame.payload.len(),
            payload: frame_payload(frame),
        }
    }
}

pub fn print_channel(record: &ChannelRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json_line(record)),
        OutputFormat::Table => {
            let mut table = new_table(vec!["STREAM", "NAME", "SIZE", "PEER", "PAYLOAD"]);
            table.add_row(vec![
                record.stream_id.to_string(),
                record.name.clone(),
                record.payload_size.to_string(),
                record.peer.clone(),
                record.payload.clone(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "stream={} name={} size={} peer={} payload={}",
                record.stream_id, record.name, record.payload_size, record.peer, record.payload
            );
        }
        OutputFormat::Raw => print_raw(&record.data),
    }
}

pub fn print_frames(frames: &[Frame], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for frame in frames {
                println!("{}", to_json_line(&FrameOutput::new(frame)));
            }
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["STREAM", "TAG", "KIND", "SIZE", "PAYLOAD"]);
            for frame in frames {
                let out = FrameOutput::new(frame);
                table.add_row(vec![
                    out.stream_id.to_string(),
                    out.tag.to_string(),
                    out.kind.to_string(),
                    out.payload_size.to_string(),
                    out.payload,
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for frame in frames {
                println!(
                    "stream={} kind={} size={} payload={}",
                    frame.stream_id,
                    frame.tag_name(),
                    frame.payload.len(),
                    frame_payload(frame)
                );
            }
        }
        OutputFormat::Raw => {
            // Only MESSAGE bodies are data; headers and names are dropped.
            for frame in frames.iter().filter(|f| f.kind == FrameKind::Message) {
                print_raw(&frame.payload);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn to_json_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn frame_payload(frame: &Frame) -> String {
    match frame.kind {
        FrameKind::Message | FrameKind::New => payload_preview(&frame.payload),
        FrameKind::Close | FrameKind::Reset => String::new(),
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
