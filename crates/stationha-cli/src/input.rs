//! JSON-lines packet input.
//!
//! Each line is either an envelope `{"kind": "loop"|"archive", "packet": {...}}`
//! or a bare packet object, which is treated as a loop packet. Blank lines and
//! lines starting with `#` are skipped.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use stationha_core::{Packet, PacketKind};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

pub type InputLines = Lines<Box<dyn AsyncBufRead + Unpin + Send>>;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordKind {
    #[default]
    Loop,
    Archive,
}

impl From<RecordKind> for PacketKind {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Loop => PacketKind::Loop,
            RecordKind::Archive => PacketKind::Archive,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    #[serde(default)]
    kind: RecordKind,
    packet: Value,
}

/// Open the input file, or stdin when no path is given.
pub async fn open(path: Option<&Path>) -> Result<InputLines> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    Ok(reader.lines())
}

/// Parse one input line. `Ok(None)` for lines that carry no packet.
pub fn parse_line(line: &str) -> Result<Option<(PacketKind, Packet)>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line).context("Invalid JSON")?;
    let is_envelope = value
        .as_object()
        .map(|obj| obj.get("packet").is_some_and(Value::is_object))
        .unwrap_or(false);

    let (kind, packet) = if is_envelope {
        let envelope: Envelope = serde_json::from_value(value).context("Invalid packet envelope")?;
        (envelope.kind.into(), envelope.packet)
    } else {
        (PacketKind::Loop, value)
    };

    let packet = Packet::from_json(&packet).map_err(|e| anyhow!("Invalid packet: {}", e))?;
    Ok(Some((kind, packet)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationha_core::PacketValue;

    #[test]
    fn test_envelope() {
        let (kind, packet) =
            parse_line(r#"{"kind": "archive", "packet": {"usUnits": 17, "outTemp": 3.5}}"#)
                .unwrap()
                .unwrap();
        assert_eq!(kind, PacketKind::Archive);
        assert_eq!(packet.get("outTemp"), Some(&PacketValue::Number(3.5)));
    }

    #[test]
    fn test_bare_packet_is_loop() {
        let (kind, packet) = parse_line(r#"{"usUnits": 1, "rain": null}"#)
            .unwrap()
            .unwrap();
        assert_eq!(kind, PacketKind::Loop);
        assert_eq!(packet.get("rain"), Some(&PacketValue::Null));
    }

    #[test]
    fn test_envelope_without_kind() {
        let (kind, _) = parse_line(r#"{"packet": {"usUnits": 17}}"#).unwrap().unwrap();
        assert_eq!(kind, PacketKind::Loop);
    }

    #[test]
    fn test_skipped_lines() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# comment").unwrap().is_none());
    }

    #[test]
    fn test_invalid_lines() {
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"kind": "hourly", "packet": {}}"#).is_err());
        assert!(parse_line(r#"{"outTemp": [1, 2]}"#).is_err());
    }
}
