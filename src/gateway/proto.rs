//! イベントストリームのバイナリパケット
//!
//! ヘッダーは16バイト固定（すべてビッグエンディアン）:
//! パケット長 u32 / ヘッダー長 u16 / バージョン u16 / オペレーション u32 / シーケンス u32

use std::io::Read;

use super::GatewayError;

pub const HEADER_LEN: usize = 16;

/// 本文がそのままのJSON
pub const VERSION_NORMAL: u16 = 0;
/// ハートビート応答（人気値）
pub const VERSION_HEARTBEAT: u16 = 1;
/// 本文がzlib圧縮された連結パケット
pub const VERSION_ZLIB: u16 = 2;
/// 本文がbrotli圧縮された連結パケット
pub const VERSION_BROTLI: u16 = 3;

/// 展開後の本文の上限
const MAX_INFLATED_LEN: u64 = 16 * 1024 * 1024;
const BROTLI_BUFFER_SIZE: usize = 4096;

/// パケットのオペレーション
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Heartbeat,
    HeartbeatReply,
    Message,
    Auth,
    AuthReply,
    Unknown(u32),
}

impl Operation {
    pub fn code(self) -> u32 {
        match self {
            Operation::Heartbeat => 2,
            Operation::HeartbeatReply => 3,
            Operation::Message => 5,
            Operation::Auth => 7,
            Operation::AuthReply => 8,
            Operation::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            2 => Operation::Heartbeat,
            3 => Operation::HeartbeatReply,
            5 => Operation::Message,
            7 => Operation::Auth,
            8 => Operation::AuthReply,
            other => Operation::Unknown(other),
        }
    }
}

/// 一つのパケット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u16,
    pub operation: Operation,
    pub sequence: u32,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(operation: Operation, body: impl Into<Vec<u8>>) -> Self {
        Self {
            version: VERSION_NORMAL,
            operation,
            sequence: 0,
            body: body.into(),
        }
    }

    /// 認証パケット
    pub fn auth(auth_body: &str) -> Self {
        Self::new(Operation::Auth, auth_body.as_bytes())
    }

    /// ハートビートパケット
    pub fn heartbeat() -> Self {
        Self::new(Operation::Heartbeat, Vec::new())
    }

    pub fn encode(&self) -> Vec<u8> {
        let packet_len = (HEADER_LEN + self.body.len()) as u32;
        let mut buf = Vec::with_capacity(packet_len as usize);
        buf.extend_from_slice(&packet_len.to_be_bytes());
        buf.extend_from_slice(&(HEADER_LEN as u16).to_be_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.operation.code().to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }

    /// 連結された複数パケットを分解
    pub fn decode_all(mut buf: &[u8]) -> Result<Vec<Packet>, GatewayError> {
        let mut packets = Vec::new();

        while !buf.is_empty() {
            if buf.len() < HEADER_LEN {
                return Err(GatewayError::Protocol(format!(
                    "ヘッダーが短すぎます: {}バイト",
                    buf.len()
                )));
            }

            let packet_len = read_u32(&buf[0..4]) as usize;
            let header_len = read_u16(&buf[4..6]) as usize;
            if header_len < HEADER_LEN || packet_len < header_len || packet_len > buf.len() {
                return Err(GatewayError::Protocol(format!(
                    "パケット長が不正です: packet_len={} header_len={} available={}",
                    packet_len,
                    header_len,
                    buf.len()
                )));
            }

            packets.push(Packet {
                version: read_u16(&buf[6..8]),
                operation: Operation::from_code(read_u32(&buf[8..12])),
                sequence: read_u32(&buf[12..16]),
                body: buf[header_len..packet_len].to_vec(),
            });
            buf = &buf[packet_len..];
        }

        Ok(packets)
    }

    /// 受信フレームを分解し、圧縮されたメッセージパケットは中身のパケットへ展開する
    ///
    /// 展開は一段のみ（中身がさらに圧縮されていてもそのまま返す）。
    pub fn decode_frame(buf: &[u8]) -> Result<Vec<Packet>, GatewayError> {
        let mut packets = Vec::new();
        for packet in Self::decode_all(buf)? {
            if packet.operation != Operation::Message {
                packets.push(packet);
                continue;
            }
            match packet.version {
                VERSION_ZLIB => {
                    let decoder = flate2::read::ZlibDecoder::new(packet.body.as_slice());
                    packets.extend(Self::decode_all(&inflate(decoder)?)?);
                }
                VERSION_BROTLI => {
                    let decoder =
                        brotli::Decompressor::new(packet.body.as_slice(), BROTLI_BUFFER_SIZE);
                    packets.extend(Self::decode_all(&inflate(decoder)?)?);
                }
                _ => packets.push(packet),
            }
        }
        Ok(packets)
    }
}

fn inflate(reader: impl Read) -> Result<Vec<u8>, GatewayError> {
    let mut inflated = Vec::new();
    reader
        .take(MAX_INFLATED_LEN)
        .read_to_end(&mut inflated)
        .map_err(|e| GatewayError::Protocol(format!("圧縮パケットを展開できません: {}", e)))?;
    Ok(inflated)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// 認証応答の本文 `{"code":0}` が成功を示すか
pub fn auth_succeeded(body: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("code").and_then(|c| c.as_i64()))
        == Some(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = Packet::auth(r#"{"key":"k"}"#).encode();
        assert_eq!(bytes.len(), 16 + 11);
        assert_eq!(&bytes[0..4], &27u32.to_be_bytes());
        assert_eq!(&bytes[4..6], &16u16.to_be_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_be_bytes());
        assert_eq!(&bytes[16..], br#"{"key":"k"}"#);
    }

    #[test]
    fn test_decode_concatenated_packets() {
        let mut buf = Packet::new(Operation::Message, br#"{"cmd":"A"}"#.to_vec()).encode();
        buf.extend(Packet::new(Operation::HeartbeatReply, vec![0, 0, 0, 1]).encode());

        let packets = Packet::decode_all(&buf).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].operation, Operation::Message);
        assert_eq!(packets[0].body, br#"{"cmd":"A"}"#);
        assert_eq!(packets[1].operation, Operation::HeartbeatReply);
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let buf = Packet::new(Operation::Message, b"hello".to_vec()).encode();
        assert!(matches!(
            Packet::decode_all(&buf[..18]),
            Err(GatewayError::Protocol(_))
        ));
        assert!(matches!(
            Packet::decode_all(&buf[..10]),
            Err(GatewayError::Protocol(_))
        ));
    }

    #[test]
    fn test_auth_reply() {
        assert!(auth_succeeded(br#"{"code":0}"#));
        assert!(!auth_succeeded(br#"{"code":-101}"#));
        assert!(!auth_succeeded(b"garbage"));
    }

    fn batch() -> Vec<u8> {
        let mut buf = Packet::new(Operation::Message, br#"{"cmd":"A"}"#.to_vec()).encode();
        buf.extend(Packet::new(Operation::Message, br#"{"cmd":"B"}"#.to_vec()).encode());
        buf
    }

    fn bodies(packets: &[Packet]) -> Vec<&[u8]> {
        packets.iter().map(|p| p.body.as_slice()).collect()
    }

    #[test]
    fn test_zlib_frame_is_expanded() {
        use flate2::write::ZlibEncoder;
        use std::io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&batch()).unwrap();
        let mut compressed = Packet::new(Operation::Message, encoder.finish().unwrap());
        compressed.version = VERSION_ZLIB;

        let mut frame = compressed.encode();
        frame.extend(Packet::new(Operation::HeartbeatReply, vec![0, 0, 0, 1]).encode());

        let packets = Packet::decode_frame(&frame).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(
            bodies(&packets[..2]),
            vec![&br#"{"cmd":"A"}"#[..], &br#"{"cmd":"B"}"#[..]]
        );
        assert!(packets[..2].iter().all(|p| p.version == VERSION_NORMAL));
        assert_eq!(packets[2].operation, Operation::HeartbeatReply);
    }

    #[test]
    fn test_brotli_frame_is_expanded() {
        use std::io::Write;

        let mut body = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut body, 4096, 5, 22);
            writer.write_all(&batch()).unwrap();
        }
        let mut compressed = Packet::new(Operation::Message, body);
        compressed.version = VERSION_BROTLI;

        let packets = Packet::decode_frame(&compressed.encode()).unwrap();
        assert_eq!(
            bodies(&packets),
            vec![&br#"{"cmd":"A"}"#[..], &br#"{"cmd":"B"}"#[..]]
        );
    }

    #[test]
    fn test_corrupt_compressed_frame_is_rejected() {
        let mut compressed = Packet::new(Operation::Message, vec![1, 2, 3]);
        compressed.version = VERSION_ZLIB;
        assert!(matches!(
            Packet::decode_frame(&compressed.encode()),
            Err(GatewayError::Protocol(_))
        ));
    }

    #[test]
    fn test_unknown_operation_is_preserved() {
        assert_eq!(Operation::from_code(42), Operation::Unknown(42));
        assert_eq!(Operation::Unknown(42).code(), 42);
    }
}
