/// 编解码器实现
///
/// 一条消息固定 28 字节，小端定长整数：
///
/// | offset | size | field     |
/// |--------|------|-----------|
/// | 0      | 4    | kind      |
/// | 4      | 8    | price     |
/// | 12     | 4    | amount    |
/// | 16     | 4    | stock_id  |
/// | 20     | 4    | trader_id |
/// | 24     | 4    | trade_id  |
use crate::protocol::Order;
use bincode::config::Config;
use thiserror::Error;

/// Encoded size of one `Order`.
pub const ORDER_WIRE_SIZE: usize = 28;

#[inline]
fn wire_config() -> impl Config {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// 编解码器trait
pub trait Codec: Send {
    type Item: Send;
    type Error: std::error::Error + Send;

    /// 解码；空缓冲返回 `None`
    fn decode(&mut self, buf: &[u8]) -> Result<Option<Self::Item>, Self::Error>;

    /// 编码到调用方提供的缓冲，返回写入字节数
    fn encode(&mut self, item: &Self::Item, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message is {len} bytes, expected {expected}")]
    WrongSize { len: usize, expected: usize },

    #[error("buffer too small: {len} < {needed}")]
    BufferTooSmall { len: usize, needed: usize },

    #[error("decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
}

/// Fixed-width codec for `Order` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderCodec;

impl OrderCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for OrderCodec {
    type Item = Order;
    type Error = CodecError;

    fn decode(&mut self, buf: &[u8]) -> Result<Option<Order>, CodecError> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() != ORDER_WIRE_SIZE {
            return Err(CodecError::WrongSize {
                len: buf.len(),
                expected: ORDER_WIRE_SIZE,
            });
        }

        let (order, _read) = bincode::decode_from_slice(buf, wire_config())?;
        Ok(Some(order))
    }

    fn encode(&mut self, item: &Order, buf: &mut [u8]) -> Result<usize, CodecError> {
        if buf.len() < ORDER_WIRE_SIZE {
            return Err(CodecError::BufferTooSmall {
                len: buf.len(),
                needed: ORDER_WIRE_SIZE,
            });
        }
        let written = bincode::encode_into_slice(*item, buf, wire_config())?;
        Ok(written)
    }
}

/// Encodes one order into a fresh fixed-size array.
pub fn encode_order(order: &Order) -> Result<[u8; ORDER_WIRE_SIZE], CodecError> {
    let mut buf = [0u8; ORDER_WIRE_SIZE];
    OrderCodec.encode(order, &mut buf)?;
    Ok(buf)
}

/// Decodes exactly one order.
pub fn decode_order(buf: &[u8]) -> Result<Order, CodecError> {
    OrderCodec.decode(buf)?.ok_or(CodecError::WrongSize {
        len: 0,
        expected: ORDER_WIRE_SIZE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OrderKind;

    #[test]
    fn test_encoded_size() {
        let mut codec = OrderCodec::new();
        let mut buf = [0u8; 64];
        let n = codec.encode(&Order::buy(1, 2, 3, 4, 5), &mut buf).unwrap();
        assert_eq!(n, ORDER_WIRE_SIZE);
    }

    #[test]
    fn test_layout_is_little_endian() {
        let order = Order::sell(0xAABB, 0x1122, 9, -3, 700);
        let buf = encode_order(&order).unwrap();

        assert_eq!(&buf[0..4], &2u32.to_le_bytes()); // Sell
        assert_eq!(&buf[4..12], &(-3i64).to_le_bytes());
        assert_eq!(&buf[12..16], &700u32.to_le_bytes());
        assert_eq!(&buf[16..20], &9u32.to_le_bytes());
        assert_eq!(&buf[20..24], &0xAABBu32.to_le_bytes());
        assert_eq!(&buf[24..28], &0x1122u32.to_le_bytes());

        assert_eq!(decode_order(&buf).unwrap(), order);
    }

    #[test]
    fn test_kind_discriminants() {
        let kinds = [
            OrderKind::Shutdown,
            OrderKind::Buy,
            OrderKind::Sell,
            OrderKind::Cancel,
            OrderKind::Partial,
            OrderKind::Full,
            OrderKind::Cancelled,
            OrderKind::NotCancelled,
        ];
        for (i, kind) in kinds.into_iter().enumerate() {
            let order = Order::buy(1, 1, 1, 1, 1).respond(kind, 1, 1);
            let buf = encode_order(&order).unwrap();
            assert_eq!(&buf[0..4], &(i as u32).to_le_bytes());
        }
    }

    #[test]
    fn test_empty_is_none() {
        assert!(OrderCodec.decode(&[]).unwrap().is_none());
    }

    #[test]
    fn test_wrong_size() {
        let buf = [0u8; ORDER_WIRE_SIZE + 1];
        assert!(matches!(
            OrderCodec.decode(&buf),
            Err(CodecError::WrongSize { len: 29, expected: 28 })
        ));
        assert!(matches!(
            OrderCodec.decode(&buf[..10]),
            Err(CodecError::WrongSize { len: 10, .. })
        ));
    }

    #[test]
    fn test_unknown_kind() {
        let mut buf = encode_order(&Order::buy(1, 1, 1, 1, 1)).unwrap();
        buf[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(OrderCodec.decode(&buf), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_buffer_too_small() {
        let mut buf = [0u8; 16];
        assert!(matches!(
            OrderCodec.encode(&Order::shutdown(), &mut buf),
            Err(CodecError::BufferTooSmall { len: 16, needed: 28 })
        ));
    }
}
